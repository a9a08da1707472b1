use core::fmt;

/// An untyped 8-byte slot holding any scalar value.
///
/// Used for the stack-top register file, global storage, and host/wasm value
/// marshalling. The contained bytes are little-endian-normalized so a slot's
/// representation is host-independent.
#[derive(Clone, Copy)]
#[repr(C)]
pub union VMVal {
    pub i32: i32,
    pub i64: i64,
    pub f32: u32,
    pub f64: u64,
    pub bytes: [u8; 8],
}

impl fmt::Debug for VMVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SAFETY: all members are plain bytes; `bytes` covers the whole union.
        unsafe { f.debug_tuple("VMVal").field(&self.bytes).finish() }
    }
}

impl PartialEq for VMVal {
    fn eq(&self, other: &Self) -> bool {
        // SAFETY: as above.
        unsafe { self.bytes == other.bytes }
    }
}

impl Default for VMVal {
    fn default() -> Self {
        VMVal { bytes: [0; 8] }
    }
}

impl VMVal {
    #[inline]
    pub fn i32(i: i32) -> VMVal {
        // Zero the upper half so `bytes` comparisons are well-defined.
        VMVal::i64(i64::from(i))
    }
    #[inline]
    pub fn i64(i: i64) -> VMVal {
        VMVal { i64: i.to_le() }
    }
    #[inline]
    pub fn u32(i: u32) -> VMVal {
        VMVal::i32(i as i32)
    }
    #[inline]
    pub fn u64(i: u64) -> VMVal {
        VMVal::i64(i as i64)
    }
    #[inline]
    pub fn f32(bits: u32) -> VMVal {
        VMVal::f64(u64::from(bits))
    }
    #[inline]
    pub fn f64(bits: u64) -> VMVal {
        VMVal { f64: bits.to_le() }
    }

    #[inline]
    pub fn get_i32(&self) -> i32 {
        // SAFETY: every constructor initializes all 8 bytes.
        unsafe { i64::from_le(self.i64) as i32 }
    }
    #[inline]
    pub fn get_i64(&self) -> i64 {
        // SAFETY: as above.
        unsafe { i64::from_le(self.i64) }
    }
    #[inline]
    pub fn get_u32(&self) -> u32 {
        self.get_i32() as u32
    }
    #[inline]
    pub fn get_u64(&self) -> u64 {
        self.get_i64() as u64
    }
    #[inline]
    pub fn get_f32(&self) -> u32 {
        // SAFETY: as above.
        unsafe { u64::from_le(self.f64) as u32 }
    }
    #[inline]
    pub fn get_f64(&self) -> u64 {
        // SAFETY: as above.
        unsafe { u64::from_le(self.f64) }
    }
}
