//! Resolved symbol addresses.
//!
//! A [`SymbolHandle`] is a pointer-width, immutable, non-owning value. The
//! memory behind it belongs to an engine context that is never torn down, so
//! a handle stays valid for the rest of the process. There is nothing to
//! release: dropping or forgetting a handle has no effect on that memory.

use std::ffi::c_void;
use std::fmt;
use std::mem::size_of;
use std::ptr::NonNull;

/// Address of a symbol inside relocated code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SymbolHandle(NonNull<c_void>);

// Plain address; the region it names is never freed.
unsafe impl Send for SymbolHandle {}
unsafe impl Sync for SymbolHandle {}

impl SymbolHandle {
    pub(crate) fn new(addr: NonNull<c_void>) -> Self {
        Self(addr)
    }

    /// Numeric address.
    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Native-endian bytes of the address.
    #[inline]
    pub fn to_ne_bytes(self) -> [u8; size_of::<usize>()] {
        self.addr().to_ne_bytes()
    }

    /// Address as a typed pointer.
    #[inline]
    pub fn as_ptr<T>(self) -> *mut T {
        self.0.as_ptr() as *mut T
    }

    /// Read the value stored at the symbol.
    ///
    /// # Safety
    ///
    /// The symbol must name initialized data of type `T`.
    pub unsafe fn read<T: Copy>(self) -> T {
        self.as_ptr::<T>().read_unaligned()
    }

    /// Overwrite the value stored at the symbol.
    ///
    /// # Safety
    ///
    /// The symbol must name writable data of type `T`, and no compiled code
    /// may be accessing it concurrently.
    pub unsafe fn write<T: Copy>(
        self,
        value: T,
    ) {
        self.as_ptr::<T>().write_unaligned(value)
    }

    /// Reinterpret the symbol as a function pointer such as
    /// `extern "C" fn(i32) -> i32`.
    ///
    /// # Safety
    ///
    /// The symbol must be a compiled function whose C signature matches `F`.
    pub unsafe fn as_fn<F: Copy>(self) -> F {
        assert_eq!(size_of::<F>(), size_of::<usize>(), "as_fn requires a pointer-sized type");
        std::mem::transmute_copy::<*mut c_void, F>(&self.0.as_ptr())
    }
}

impl fmt::Debug for SymbolHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "SymbolHandle({:#x})", self.addr())
    }
}

impl fmt::Pointer for SymbolHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        fmt::Pointer::fmt(&self.0, f)
    }
}

impl From<SymbolHandle> for usize {
    fn from(handle: SymbolHandle) -> Self {
        handle.addr()
    }
}
