use anyhow::bail;
use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use bytes_varint::try_get_fixed::TryGetFixedSupport;

use crate::safe_converter::PrecheckedCast;

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct PacketFlags: u8 {
        const FRAGMENT = 0b0000_0001;
    }
}

/// The header stamped onto every outgoing unit, fragment or not. Fragments
///  of one payload all share the payload's packet sequence number and each
///  carry the full ack information, so acknowledgments survive the loss of
///  individual fragments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PacketHeader {
    pub sequence: u16,
    /// the latest sequence number received from the peer
    pub ack: u16,
    /// bit k set means `ack - (k + 1)` was received from the peer as well
    pub ack_bits: u32,
    pub kind: PacketKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PacketKind {
    Regular,
    Fragment {
        fragment_id: u8,
        /// 1..=256 - transmitted as `fragment_count - 1` in a single byte
        fragment_count: u16,
    },
}

impl PacketHeader {
    pub const REGULAR_SERIALIZED_LEN: usize = size_of::<u8>() + 2 * size_of::<u16>() + size_of::<u32>();
    pub const FRAGMENT_SERIALIZED_LEN: usize = Self::REGULAR_SERIALIZED_LEN + 2 * size_of::<u8>();

    pub fn regular(sequence: u16, ack: u16, ack_bits: u32) -> PacketHeader {
        PacketHeader {
            sequence,
            ack,
            ack_bits,
            kind: PacketKind::Regular,
        }
    }

    pub fn fragment(sequence: u16, ack: u16, ack_bits: u32, fragment_id: u8, fragment_count: u16) -> PacketHeader {
        PacketHeader {
            sequence,
            ack,
            ack_bits,
            kind: PacketKind::Fragment { fragment_id, fragment_count },
        }
    }

    pub fn serialized_len(&self) -> usize {
        match self.kind {
            PacketKind::Regular => Self::REGULAR_SERIALIZED_LEN,
            PacketKind::Fragment { .. } => Self::FRAGMENT_SERIALIZED_LEN,
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        let mut flags = PacketFlags::empty();
        if matches!(self.kind, PacketKind::Fragment { .. }) {
            flags |= PacketFlags::FRAGMENT;
        }
        buf.put_u8(flags.bits());
        buf.put_u16(self.sequence);
        buf.put_u16(self.ack);
        buf.put_u32(self.ack_bits);
        if let PacketKind::Fragment { fragment_id, fragment_count } = self.kind {
            buf.put_u8(fragment_id);
            buf.put_u8((fragment_count - 1).prechecked_cast());
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<PacketHeader> {
        let raw_flags = buf.try_get_u8()?;
        let Some(flags) = PacketFlags::from_bits(raw_flags) else {
            bail!("undefined packet flags {:#04x}", raw_flags);
        };

        let sequence = buf.try_get_u16()?;
        let ack = buf.try_get_u16()?;
        let ack_bits = buf.try_get_u32()?;

        let kind = if flags.contains(PacketFlags::FRAGMENT) {
            let fragment_id = buf.try_get_u8()?;
            let fragment_count = buf.try_get_u8()? as u16 + 1;
            if fragment_id as u16 >= fragment_count {
                bail!("fragment id {} out of range for fragment count {}", fragment_id, fragment_count);
            }
            PacketKind::Fragment { fragment_id, fragment_count }
        }
        else {
            PacketKind::Regular
        };

        Ok(PacketHeader {
            sequence,
            ack,
            ack_bits,
            kind,
        })
    }
}
