pub trait WriteBytesBe {
    fn write_be(&self, dst: &mut Vec<u8>);
}

macro_rules! impl_num_be {
    ($($t:ty),+) => { $(
        impl WriteBytesBe for $t { #[inline] fn write_be(&self, dst: &mut Vec<u8>) { dst.extend_from_slice(&self.to_be_bytes()); }}
    )+ }
}

impl_num_be!(u8, i8, u16, i16, u32, i32, u64, i64);

impl<T: WriteBytesBe> WriteBytesBe for Vec<T> {
    #[inline]
    fn write_be(&self, dst: &mut Vec<u8>) {
        self.iter().for_each(|item| item.write_be(dst));
    }
}

impl<T: WriteBytesBe, const N: usize> WriteBytesBe for [T; N] {
    #[inline]
    fn write_be(&self, dst: &mut Vec<u8>) {
        self.iter().for_each(|item| item.write_be(dst));
    }
}

#[macro_export]
macro_rules! join_bytes_be {
    ( $($value:expr),+ $(,)? ) => {{
        let mut vec = Vec::<u8>::new();
        $( $value.write_be(&mut vec); )+
        vec
    }};
}

#[allow(unused_imports)]
pub use join_bytes_be;

#[cfg(test)]
mod tests {
    use crate::byteorder::WriteBytesBe;
    use mhasconv_macros::ToBytes;

    #[derive(ToBytes)]
    struct Mini {
        a: u16,
        b: u32,
        fourcc: [u8; 4],
        tail: Vec<i16>,
    }

    #[test]
    fn to_bytes_big_endian() {
        let s = Mini {
            a: 0x1234,
            b: 0xABCDEF01,
            fourcc: *b"mhm1",
            tail: vec![-1, 2],
        };

        let vec_be = &mut Vec::new();
        s.write_be(vec_be);

        let expected_be = [
            0x12, 0x34, 0xAB, 0xCD, 0xEF, 0x01, b'm', b'h', b'm', b'1', 0xFF, 0xFF, 0x00, 0x02,
        ];

        assert_eq!(&vec_be[..], &expected_be);
    }

    #[test]
    fn join_bytes() {
        let bytes = join_bytes_be!(1u8, 0x0203u16, [4u8, 5]);
        assert_eq!(bytes, vec![1, 2, 3, 4, 5]);
    }
}
