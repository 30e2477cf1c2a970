/// Room for `0x` followed by every nibble of a `usize`
pub const HEX_USIZE_LEN: usize = 2 + 2 * core::mem::size_of::<usize>();

/// Round up `n` to the nearest `to`
pub const fn round_up(n: usize, to: usize) -> usize {
    to * ((n + to - 1) / to)
}

/// Format `n` as lowercase `0x`-prefixed hex into `buf`, without touching
/// the allocator. Zero is `0x0`, there is no zero padding.
pub fn hex(n: usize, buf: &mut [u8; HEX_USIZE_LEN]) -> &str {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";

    let mut i = buf.len();
    let mut rest = n;
    loop {
        i -= 1;
        buf[i] = DIGITS[rest & 0xf];
        rest >>= 4;
        if rest == 0 {
            break;
        }
    }
    buf[i - 2] = b'0';
    buf[i - 1] = b'x';
    // SAFETY: every byte from `i - 2` on is ASCII, written just above
    unsafe { core::str::from_utf8_unchecked(&buf[i - 2..]) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn round_up_rounds_to_multiples() {
        assert_eq!(round_up(0, 16), 0);
        assert_eq!(round_up(1, 16), 16);
        assert_eq!(round_up(16, 16), 16);
        assert_eq!(round_up(17, 16), 32);
    }

    #[test]
    pub fn hex_formats_without_padding() {
        let mut buf = [0u8; HEX_USIZE_LEN];
        assert_eq!(hex(0, &mut buf), "0x0");
        assert_eq!(hex(0xdeadbeef, &mut buf), "0xdeadbeef");
        assert_eq!(hex(0x10, &mut buf), "0x10");
        assert_eq!(hex(usize::MAX, &mut buf).len(), HEX_USIZE_LEN);
    }
}
