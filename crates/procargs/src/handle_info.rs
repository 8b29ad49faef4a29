// Author: Lukas Bower
// Purpose: Handle-info tags that pair each transferred handle with its role.

use core::fmt;

/// Role of a handle delivered in a bootstrap message.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleType {
    /// The new process itself.
    ProcessSelf = 0x01,
    /// The initial thread of the new process.
    ThreadSelf = 0x02,
    /// Job the process may create children in.
    Job = 0x03,
    /// Root address-space region of the process.
    RootVmar = 0x04,
    /// Channel to the loader service.
    LoaderService = 0x10,
    /// System runtime image (syscall veneer).
    RuntimeImage = 0x11,
    /// Memory object backing the initial thread stack.
    StackVmo = 0x13,
    /// Main executable image left for the dynamic linker to map.
    ExecutableVmo = 0x14,
    /// Application-defined handle slot 0.
    User0 = 0xf0,
    /// Application-defined handle slot 1.
    User1 = 0xf1,
    /// Application-defined handle slot 2.
    User2 = 0xf2,
}

impl TryFrom<u16> for HandleType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        use HandleType::*;
        Ok(match value {
            0x01 => ProcessSelf,
            0x02 => ThreadSelf,
            0x03 => Job,
            0x04 => RootVmar,
            0x10 => LoaderService,
            0x11 => RuntimeImage,
            0x13 => StackVmo,
            0x14 => ExecutableVmo,
            0xf0 => User0,
            0xf1 => User1,
            0xf2 => User2,
            other => return Err(other),
        })
    }
}

/// Packed handle tag: the type in the low 16 bits, a type-specific
/// argument in the high 16 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HandleInfo(u32);

impl HandleInfo {
    /// Build a tag from a handle type and argument.
    #[must_use]
    pub const fn new(ty: HandleType, arg: u16) -> Self {
        Self((ty as u16 as u32) | ((arg as u32) << 16))
    }

    /// Wrap a raw tag value as read from the wire.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw tag value as written to the wire.
    #[must_use]
    pub const fn into_raw(self) -> u32 {
        self.0
    }

    /// Untyped low half of the tag.
    #[must_use]
    pub const fn raw_type(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    /// Decoded handle type, when it is one this crate knows.
    #[must_use]
    pub fn handle_type(self) -> Option<HandleType> {
        HandleType::try_from(self.raw_type()).ok()
    }

    /// Type-specific argument.
    #[must_use]
    pub const fn arg(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl From<HandleType> for HandleInfo {
    fn from(ty: HandleType) -> Self {
        Self::new(ty, 0)
    }
}

impl fmt::Debug for HandleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.handle_type() {
            Some(ty) => write!(f, "HandleInfo({ty:?}, {})", self.arg()),
            None => write!(f, "HandleInfo({:#06x}, {})", self.raw_type(), self.arg()),
        }
    }
}
