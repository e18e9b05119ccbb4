use std::mem::size_of;

/// Fixed-width value stored little-endian in the target process.
pub trait Scalar: Copy {
    const SIZE: usize;

    /// `bytes` must be exactly `SIZE` long.
    fn from_le_slice(bytes: &[u8]) -> Self;
    fn to_le_vec(self) -> Vec<u8>;
}

macro_rules! impl_scalar {
    ($($type:ty),*) => {
        $(
            impl Scalar for $type {
                const SIZE: usize = size_of::<$type>();

                fn from_le_slice(bytes: &[u8]) -> Self {
                    let mut buffer = [0u8; size_of::<$type>()];
                    buffer.copy_from_slice(bytes);
                    <$type>::from_le_bytes(buffer)
                }

                fn to_le_vec(self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }
        )*
    };
}

impl_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);
