// Author: Lukas Bower
// Purpose: Encode and decode the process-arguments bootstrap record.

use alloc::vec::Vec;

use crate::{HandleInfo, ProcargsError};

/// Magic value opening every process-arguments record.
pub const PROCARGS_PROTOCOL: u32 = 0x4150_585d;
/// Record layout version understood by the child runtime.
pub const PROCARGS_VERSION: u32 = 0x0000_1000;
/// Encoded size of [`ProcArgsHeader`].
pub const PROCARGS_HEADER_LEN: usize = 28;
/// Fixed handle-info slots reserved in the dynamic-linker record.
pub const LOADER_HANDLE_SLOTS: usize = 5;

/// Fixed header of a process-arguments record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcArgsHeader {
    /// Must equal [`PROCARGS_PROTOCOL`].
    pub protocol: u32,
    /// Must equal [`PROCARGS_VERSION`].
    pub version: u32,
    /// Offset of the handle-info array.
    pub handle_info_off: u32,
    /// Offset of the argument strings.
    pub args_off: u32,
    /// Number of argument strings.
    pub args_num: u32,
    /// Offset of the environment strings.
    pub environ_off: u32,
    /// Number of environment strings.
    pub environ_num: u32,
}

impl ProcArgsHeader {
    /// Append the little-endian encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        for word in [
            self.protocol,
            self.version,
            self.handle_info_off,
            self.args_off,
            self.args_num,
            self.environ_off,
            self.environ_num,
        ] {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }

    /// Decode and validate a header from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProcargsError> {
        if bytes.len() < PROCARGS_HEADER_LEN {
            return Err(ProcargsError::Truncated {
                needed: PROCARGS_HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let word = |idx: usize| {
            let start = idx * 4;
            u32::from_le_bytes([
                bytes[start],
                bytes[start + 1],
                bytes[start + 2],
                bytes[start + 3],
            ])
        };
        let header = Self {
            protocol: word(0),
            version: word(1),
            handle_info_off: word(2),
            args_off: word(3),
            args_num: word(4),
            environ_off: word(5),
            environ_num: word(6),
        };
        if header.protocol != PROCARGS_PROTOCOL {
            return Err(ProcargsError::BadProtocol(header.protocol));
        }
        if header.version != PROCARGS_VERSION {
            return Err(ProcargsError::BadVersion(header.version));
        }
        Ok(header)
    }
}

/// A run of NUL-terminated strings already packed back to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Strings<'a> {
    /// Packed bytes, one trailing NUL per string.
    pub bytes: &'a [u8],
    /// Number of strings in `bytes`.
    pub count: u32,
}

impl<'a> Strings<'a> {
    /// Zero strings.
    pub const EMPTY: Strings<'static> = Strings {
        bytes: &[],
        count: 0,
    };

    /// Wrap a packed string run.
    #[must_use]
    pub const fn new(bytes: &'a [u8], count: u32) -> Self {
        Self { bytes, count }
    }
}

/// Total length of a generic record carrying `handles` handle-info entries.
#[must_use]
pub fn procargs_len(handles: usize, args: Strings<'_>, env: Strings<'_>) -> usize {
    PROCARGS_HEADER_LEN
        .saturating_add(handles.saturating_mul(4))
        .saturating_add(args.bytes.len())
        .saturating_add(env.bytes.len())
}

/// Encode the generic record: header, one tag per attached handle, argv, envp.
pub fn encode_procargs(
    info: &[HandleInfo],
    args: Strings<'_>,
    env: Strings<'_>,
) -> Result<Vec<u8>, ProcargsError> {
    encode_record(info, info.len(), args, env)
}

/// Encode the dynamic-linker record. The handle-info array always spans
/// [`LOADER_HANDLE_SLOTS`] entries; unused slots are zero.
pub fn encode_loader_message(
    info: &[HandleInfo],
    args: Strings<'_>,
    env: Strings<'_>,
) -> Result<Vec<u8>, ProcargsError> {
    if info.len() > LOADER_HANDLE_SLOTS {
        return Err(ProcargsError::TooManyHandles {
            count: info.len(),
            slots: LOADER_HANDLE_SLOTS,
        });
    }
    encode_record(info, LOADER_HANDLE_SLOTS, args, env)
}

fn encode_record(
    info: &[HandleInfo],
    slots: usize,
    args: Strings<'_>,
    env: Strings<'_>,
) -> Result<Vec<u8>, ProcargsError> {
    let total = procargs_len(slots, args, env);
    let to_u32 = |value: usize| u32::try_from(value).map_err(|_| ProcargsError::TooLarge(total));
    let strings_off = PROCARGS_HEADER_LEN + slots * 4;
    // Offsets of empty sections stay zero.
    let section = |count: u32, offset: usize| if count == 0 { 0 } else { offset };
    let args_off = section(args.count, strings_off);
    let environ_off = section(env.count, strings_off + args.bytes.len());
    let header = ProcArgsHeader {
        protocol: PROCARGS_PROTOCOL,
        version: PROCARGS_VERSION,
        handle_info_off: to_u32(PROCARGS_HEADER_LEN)?,
        args_off: to_u32(args_off)?,
        args_num: args.count,
        environ_off: to_u32(environ_off)?,
        environ_num: env.count,
    };
    to_u32(total)?;

    let mut out = Vec::with_capacity(total);
    header.encode_into(&mut out);
    for slot in 0..slots {
        let raw = info.get(slot).map_or(0, |tag| tag.into_raw());
        out.extend_from_slice(&raw.to_le_bytes());
    }
    out.extend_from_slice(args.bytes);
    out.extend_from_slice(env.bytes);
    debug_assert_eq!(out.len(), total);
    Ok(out)
}

/// Borrowed view over a received process-arguments record.
#[derive(Debug, Clone, Copy)]
pub struct ProcArgs<'a> {
    header: ProcArgsHeader,
    bytes: &'a [u8],
}

impl<'a> ProcArgs<'a> {
    /// Validate the header and section offsets of `bytes`.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ProcargsError> {
        let header = ProcArgsHeader::decode(bytes)?;
        for offset in [header.handle_info_off, header.args_off, header.environ_off] {
            if offset as usize > bytes.len() {
                return Err(ProcargsError::OutOfRange {
                    offset,
                    len: bytes.len(),
                });
            }
        }
        Ok(Self { header, bytes })
    }

    /// Decoded header.
    #[must_use]
    pub fn header(&self) -> &ProcArgsHeader {
        &self.header
    }

    /// Read `count` handle-info entries; `count` is the number of handles
    /// that arrived alongside the record.
    pub fn handle_info(&self, count: usize) -> Result<Vec<HandleInfo>, ProcargsError> {
        let start = self.header.handle_info_off as usize;
        let needed = start.saturating_add(count.saturating_mul(4));
        if needed > self.bytes.len() {
            return Err(ProcargsError::Truncated {
                needed,
                actual: self.bytes.len(),
            });
        }
        Ok(self.bytes[start..needed]
            .chunks_exact(4)
            .map(|chunk| HandleInfo::from_raw(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])))
            .collect())
    }

    /// Argument strings without their terminators.
    pub fn args(&self) -> Result<Vec<&'a [u8]>, ProcargsError> {
        self.strings(self.header.args_off, self.header.args_num)
    }

    /// Environment strings without their terminators.
    pub fn environ(&self) -> Result<Vec<&'a [u8]>, ProcargsError> {
        self.strings(self.header.environ_off, self.header.environ_num)
    }

    fn strings(&self, offset: u32, count: u32) -> Result<Vec<&'a [u8]>, ProcargsError> {
        let mut rest = &self.bytes[offset as usize..];
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let end = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or(ProcargsError::Unterminated)?;
            out.push(&rest[..end]);
            rest = &rest[end + 1..];
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HandleType;

    #[test]
    fn generic_record_places_sections_back_to_back() {
        let info = [
            HandleInfo::from(HandleType::ProcessSelf),
            HandleInfo::from(HandleType::RootVmar),
        ];
        let args = Strings::new(b"a\0bb\0ccc\0", 3);
        let bytes = encode_procargs(&info, args, Strings::EMPTY).unwrap();
        assert_eq!(bytes.len(), 28 + 8 + 9);

        let parsed = ProcArgs::parse(&bytes).unwrap();
        assert_eq!(parsed.header().handle_info_off, 28);
        assert_eq!(parsed.header().args_off, 36);
        assert_eq!(parsed.header().environ_off, 0);
        assert_eq!(parsed.handle_info(2).unwrap(), info);
        let argv = parsed.args().unwrap();
        assert_eq!(argv, [&b"a"[..], b"bb", b"ccc"]);
        assert!(parsed.environ().unwrap().is_empty());
    }

    #[test]
    fn empty_sections_have_zero_offsets() {
        let bytes = encode_procargs(&[], Strings::EMPTY, Strings::EMPTY).unwrap();
        let parsed = ProcArgs::parse(&bytes).unwrap();
        assert_eq!(parsed.header().args_off, 0);
        assert_eq!(parsed.header().environ_off, 0);
        assert!(parsed.args().unwrap().is_empty());

        let bytes = encode_procargs(&[], Strings::EMPTY, Strings::new(b"K=V\0", 1)).unwrap();
        let parsed = ProcArgs::parse(&bytes).unwrap();
        assert_eq!(parsed.header().args_off, 0);
        assert_eq!(parsed.header().environ_off, 28);
        assert_eq!(parsed.environ().unwrap(), [&b"K=V"[..]]);
    }

    #[test]
    fn loader_record_reserves_five_slots() {
        let info = [HandleInfo::from(HandleType::LoaderService)];
        let bytes = encode_loader_message(&info, Strings::new(b"x\0", 1), Strings::EMPTY).unwrap();
        let parsed = ProcArgs::parse(&bytes).unwrap();
        assert_eq!(parsed.header().args_off, 48);
        let slots = parsed.handle_info(LOADER_HANDLE_SLOTS).unwrap();
        assert_eq!(slots[0], info[0]);
        assert!(slots[1..].iter().all(|tag| tag.into_raw() == 0));
    }

    #[test]
    fn loader_record_rejects_extra_handles() {
        let info = [HandleInfo::from(HandleType::User0); 6];
        let err = encode_loader_message(&info, Strings::EMPTY, Strings::EMPTY).unwrap_err();
        assert_eq!(err, ProcargsError::TooManyHandles { count: 6, slots: 5 });
    }

    #[test]
    fn parse_rejects_bad_magic_and_offsets() {
        let mut bytes = encode_procargs(&[], Strings::EMPTY, Strings::EMPTY).unwrap();
        bytes[0] ^= 0xff;
        assert!(matches!(
            ProcArgs::parse(&bytes),
            Err(ProcargsError::BadProtocol(_))
        ));

        let mut bytes = encode_procargs(&[], Strings::EMPTY, Strings::EMPTY).unwrap();
        bytes[12] = 0x40;
        assert!(matches!(
            ProcArgs::parse(&bytes),
            Err(ProcargsError::OutOfRange { offset: 0x40, .. })
        ));
    }

    #[test]
    fn missing_terminator_is_reported() {
        let bytes = encode_procargs(&[], Strings::new(b"abc", 1), Strings::EMPTY).unwrap();
        let parsed = ProcArgs::parse(&bytes).unwrap();
        assert_eq!(parsed.args().unwrap_err(), ProcargsError::Unterminated);
    }
}
