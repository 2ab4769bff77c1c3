// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packed frame codec.
//!
//! Frames are host-endian and unversioned: they exist to move batches
//! between threads of one process, never across machines or runs.

use crate::message::{Frame, IpUpdate, MAX_TAGS, MsgHeader, MsgType, Role, TagEntry, TagList};
use tags::TagKey;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame truncated reading {0}")]
    Truncated(&'static str),
    #[error("unknown message type {0}")]
    BadMsgType(u8),
    #[error("unknown role {0}")]
    BadRole(u8),
    #[error("per-IP tag count {0} exceeds limit {MAX_TAGS}")]
    TooManyTags(u16),
}

fn put_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_ne_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_ne_bytes());
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_ne_bytes());
}

const HEADER_LEN: usize = 18;
const IP_ENTRY_LEN: usize = 19;
const TAG_ENTRY_LEN: usize = 21;

fn put_header(buf: &mut Vec<u8>, header: &MsgHeader) {
    put_u8(buf, header.msg_type as u8);
    put_u8(buf, header.sender);
    put_u32(buf, header.timestamp);
    put_u32(buf, header.body_count);
    put_u32(buf, header.seqno);
    put_u32(buf, header.tag_count);
}

/// Encode an UPDATE batch.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_update(sender: u8, seqno: u32, updates: &[IpUpdate]) -> Frame {
    let tag_count: usize = updates.iter().map(|u| u.tags.len()).sum();
    let mut buf =
        Vec::with_capacity(HEADER_LEN + updates.len() * IP_ENTRY_LEN + tag_count * TAG_ENTRY_LEN);
    put_header(&mut buf, &MsgHeader {
        msg_type: MsgType::Update,
        sender,
        timestamp: 0,
        body_count: updates.len() as u32,
        seqno,
        tag_count: tag_count as u32,
    });
    for update in updates {
        put_u32(&mut buf, update.ip);
        put_u32(&mut buf, update.src_asn);
        put_u8(&mut buf, update.role as u8);
        put_u16(&mut buf, update.tags.len() as u16);
        put_u32(&mut buf, update.bytes);
        put_u32(&mut buf, update.packets);
        for tag in &update.tags {
            put_u8(&mut buf, tag.key.class_raw());
            put_u64(&mut buf, tag.key.raw());
            put_u64(&mut buf, tag.bytes);
            put_u32(&mut buf, tag.packets);
        }
    }
    buf
}

/// Encode a bodyless control message (interval end, halt, reset).
#[must_use]
pub fn encode_control(msg_type: MsgType, sender: u8, timestamp: u32, seqno: u32) -> Frame {
    let mut buf = Vec::with_capacity(HEADER_LEN);
    put_header(&mut buf, &MsgHeader {
        msg_type,
        sender,
        timestamp,
        body_count: 0,
        seqno,
        tag_count: 0,
    });
    buf
}

#[derive(Debug, PartialEq)]
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let end = self
            .pos
            .checked_add(N)
            .ok_or(DecodeError::Truncated(field))?;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or(DecodeError::Truncated(field))?;
        self.pos = end;
        slice.try_into().map_err(|_| DecodeError::Truncated(field))
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(u8::from_ne_bytes(self.take::<1>(field)?))
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        Ok(u16::from_ne_bytes(self.take::<2>(field)?))
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        Ok(u32::from_ne_bytes(self.take::<4>(field)?))
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, DecodeError> {
        Ok(u64::from_ne_bytes(self.take::<8>(field)?))
    }
}

/// Decoder for a received frame: the header plus an iterator over the
/// per-IP updates of an UPDATE body.
pub struct FrameReader;

impl FrameReader {
    pub fn parse(frame: &[u8]) -> Result<(MsgHeader, UpdateIter<'_>), DecodeError> {
        let mut cursor = Cursor { buf: frame, pos: 0 };
        let raw_type = cursor.u8("msg_type")?;
        let msg_type = MsgType::from_repr(raw_type).ok_or(DecodeError::BadMsgType(raw_type))?;
        let header = MsgHeader {
            msg_type,
            sender: cursor.u8("sender")?,
            timestamp: cursor.u32("timestamp")?,
            body_count: cursor.u32("body_count")?,
            seqno: cursor.u32("seqno")?,
            tag_count: cursor.u32("tag_count")?,
        };
        let remaining = if msg_type == MsgType::Update {
            header.body_count
        } else {
            0
        };
        Ok((header, UpdateIter { cursor, remaining }))
    }
}

/// Iterates the per-IP updates of an UPDATE frame.
#[derive(Debug, PartialEq)]
pub struct UpdateIter<'a> {
    cursor: Cursor<'a>,
    remaining: u32,
}

impl UpdateIter<'_> {
    fn next_update(&mut self) -> Result<IpUpdate, DecodeError> {
        let ip = self.cursor.u32("ip")?;
        let src_asn = self.cursor.u32("src_asn")?;
        let raw_role = self.cursor.u8("role")?;
        let role = Role::from_repr(raw_role).ok_or(DecodeError::BadRole(raw_role))?;
        let numtags = self.cursor.u16("numtags")?;
        if usize::from(numtags) > MAX_TAGS {
            return Err(DecodeError::TooManyTags(numtags));
        }
        let bytes = self.cursor.u32("bytes")?;
        let packets = self.cursor.u32("packets")?;
        let mut tags = TagList::new();
        for _ in 0..numtags {
            // the class byte duplicates the key's high byte; the key wins
            let _class = self.cursor.u8("class")?;
            let key = TagKey::from_raw(self.cursor.u64("tag_id")?);
            let tag_bytes = self.cursor.u64("tag_bytes")?;
            let tag_packets = self.cursor.u32("tag_packets")?;
            tags.push(TagEntry {
                key,
                bytes: tag_bytes,
                packets: tag_packets,
            });
        }
        Ok(IpUpdate {
            ip,
            src_asn,
            role,
            bytes,
            packets,
            tags,
        })
    }
}

impl Iterator for UpdateIter<'_> {
    type Item = Result<IpUpdate, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let update = self.next_update();
        if update.is_err() {
            // poisoned cursor; stop after reporting
            self.remaining = 0;
        }
        Some(update)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // valid in tests
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tags::MetricClass;

    fn tag(class: MetricClass, value: u32, bytes: u64, packets: u32) -> TagEntry {
        TagEntry {
            key: TagKey::new(class, value),
            bytes,
            packets,
        }
    }

    #[test]
    fn update_round_trip() {
        let updates = vec![
            IpUpdate {
                ip: 0x0102_0304,
                src_asn: 64512,
                role: Role::Src,
                bytes: 40,
                packets: 1,
                tags: [
                    tag(MetricClass::Combined, 0, 40, 1),
                    tag(MetricClass::TcpDstPort, 80, 40, 1),
                ]
                .into_iter()
                .collect(),
            },
            IpUpdate {
                ip: 0x0506_0708,
                src_asn: 0,
                role: Role::Dst,
                bytes: 0,
                packets: 0,
                tags: [tag(MetricClass::Combined, 0, 0, 0)].into_iter().collect(),
            },
        ];
        let frame = encode_update(3, 17, &updates);

        let (header, iter) = FrameReader::parse(&frame).unwrap();
        assert_eq!(header.msg_type, MsgType::Update);
        assert_eq!(header.sender, 3);
        assert_eq!(header.seqno, 17);
        assert_eq!(header.body_count, 2);
        assert_eq!(header.tag_count, 3);

        let decoded: Vec<IpUpdate> = iter.map(|u| u.unwrap()).collect();
        assert_eq!(decoded, updates);
    }

    #[test]
    fn control_round_trip() {
        let frame = encode_control(MsgType::IntervalEnd, 7, 1_700_000_000, 42);
        let (header, mut iter) = FrameReader::parse(&frame).unwrap();
        assert_eq!(header.msg_type, MsgType::IntervalEnd);
        assert_eq!(header.sender, 7);
        assert_eq!(header.timestamp, 1_700_000_000);
        assert_eq!(header.seqno, 42);
        assert!(iter.next().is_none());
    }

    #[test]
    fn truncated_frames_error_out() {
        let updates = vec![IpUpdate {
            ip: 1,
            src_asn: 2,
            role: Role::Src,
            bytes: 3,
            packets: 4,
            tags: [tag(MetricClass::Combined, 0, 3, 4)].into_iter().collect(),
        }];
        let frame = encode_update(0, 0, &updates);
        for cut in [0, 5, HEADER_LEN, frame.len() - 1] {
            let result = FrameReader::parse(&frame[..cut]);
            match result {
                Err(DecodeError::Truncated(_)) => {}
                Ok((_, iter)) => {
                    assert!(
                        iter.collect::<Result<Vec<_>, _>>().is_err(),
                        "cut at {cut} decoded fully"
                    );
                }
                Err(other) => unreachable!("unexpected error {other}"),
            }
        }
    }

    #[test]
    fn rejects_garbage_type_and_role() {
        let mut frame = encode_control(MsgType::Halt, 0, 0, 0);
        frame[0] = 9;
        assert_eq!(FrameReader::parse(&frame), Err(DecodeError::BadMsgType(9)));

        let updates = vec![IpUpdate {
            ip: 1,
            src_asn: 0,
            role: Role::Dst,
            bytes: 0,
            packets: 0,
            tags: TagList::new(),
        }];
        let mut frame = encode_update(0, 0, &updates);
        // role byte sits after the header and the ip/src_asn words
        frame[HEADER_LEN + 8] = 0;
        let (_, iter) = FrameReader::parse(&frame).unwrap();
        let items: Vec<_> = iter.collect();
        assert_eq!(items, vec![Err(DecodeError::BadRole(0))]);
    }

    #[test]
    fn arbitrary_single_updates_round_trip() {
        bolero::check!().with_arbitrary().for_each(
            |&(ip, asn, bytes, packets, raw_tag): &(u32, u32, u32, u32, u64)| {
                let update = IpUpdate {
                    ip,
                    src_asn: asn,
                    role: Role::Src,
                    bytes,
                    packets,
                    tags: [TagEntry {
                        key: TagKey::from_raw(raw_tag),
                        bytes: u64::from(bytes),
                        packets,
                    }]
                    .into_iter()
                    .collect(),
                };
                let frame = encode_update(1, 9, std::slice::from_ref(&update));
                let (_, iter) = FrameReader::parse(&frame).unwrap();
                let decoded: Vec<IpUpdate> = iter.map(|u| u.unwrap()).collect();
                assert_eq!(decoded, vec![update]);
            },
        );
    }
}
