/// Sign-extends the low `bits` bits of `value` to a full word.
#[inline(always)]
pub fn sign_extend(value: u32, bits: u32) -> u32 {
    let shift = 32 - bits;
    (((value << shift) as i32) >> shift) as u32
}

/// Allocates a boxed slice directly on the heap.
///
/// `Box::new([T; N])` materializes the array on the stack first, which
/// overflows for multi-megabyte regions.
pub fn boxed_slice<T: Clone>(value: T, len: usize) -> Box<[T]> {
    vec![value; len].into_boxed_slice()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_extend_widens_negative_immediates() {
        assert_eq!(sign_extend(0xff, 8), 0xffff_ffff);
        assert_eq!(sign_extend(0x7f, 8), 0x7f);
        assert_eq!(sign_extend(0x800000, 24), 0xff80_0000);
    }
}
