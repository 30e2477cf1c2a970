//! `#[serde(with = "hex_addr")]` for addresses: `"0x7f12..."` strings
//! rather than numbers, formatted on the stack.

use serde::Serializer;

use crate::util::num::{hex, HEX_USIZE_LEN};

pub fn serialize<S>(addr: &usize, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut buf = [0u8; HEX_USIZE_LEN];
    serializer.serialize_str(hex(*addr, &mut buf))
}
