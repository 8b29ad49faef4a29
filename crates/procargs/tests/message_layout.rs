// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Pin the byte layout of the process-arguments record.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use cohesix_procargs::{
    encode_procargs, procargs_len, HandleInfo, HandleType, ProcArgs, ProcargsError, Strings,
    PROCARGS_HEADER_LEN,
};

const ARGS: &[u8] = b"a\0bb\0ccc\0";

#[test]
fn record_bytes_are_stable() {
    let info = [
        HandleInfo::new(HandleType::ProcessSelf, 0),
        HandleInfo::new(HandleType::User1, 0x0102),
    ];
    let args = Strings::new(ARGS, 3);
    let bytes = encode_procargs(&info, args, Strings::EMPTY).unwrap();
    assert_eq!(bytes.len(), procargs_len(2, args, Strings::EMPTY));
    assert_eq!(bytes.len(), PROCARGS_HEADER_LEN + 8 + 9);

    let expected_header: [u32; 7] = [0x4150_585d, 0x0000_1000, 28, 36, 3, 0, 0];
    for (idx, word) in expected_header.iter().enumerate() {
        let at = idx * 4;
        let got = u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        assert_eq!(got, *word, "header word {idx}");
    }
    assert_eq!(&bytes[28..32], &0x0000_0001u32.to_le_bytes());
    assert_eq!(&bytes[32..36], &0x0102_00f1u32.to_le_bytes());
    assert_eq!(&bytes[36..], ARGS);
}

#[test]
fn strings_round_trip_by_nul_scanning() {
    let bytes = encode_procargs(&[], Strings::new(ARGS, 3), Strings::new(b"K=V\0", 1)).unwrap();
    let record = ProcArgs::parse(&bytes).unwrap();
    assert_eq!(record.args().unwrap(), [&b"a"[..], &b"bb"[..], &b"ccc"[..]]);
    assert_eq!(record.environ().unwrap(), [&b"K=V"[..]]);
    assert!(record.handle_info(0).unwrap().is_empty());
}

#[test]
fn truncated_record_is_rejected() {
    let bytes = encode_procargs(&[], Strings::new(ARGS, 3), Strings::new(b"K=V\0", 1)).unwrap();
    assert_eq!(bytes.len(), 41);
    assert!(matches!(
        ProcArgs::parse(&bytes[..PROCARGS_HEADER_LEN - 1]),
        Err(ProcargsError::Truncated { .. })
    ));
    assert!(matches!(
        ProcArgs::parse(&bytes[..36]),
        Err(ProcargsError::OutOfRange { offset: 37, len: 36 })
    ));
}
