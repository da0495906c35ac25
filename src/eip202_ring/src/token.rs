/*
Copyright 2026 The Hyperlight Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Output token decoding
//!
//! The engine writes an output token behind every first result descriptor.
//! Words 0..4 are always present, words 4..8 form the extension and bypass
//! data follows from word 8.
//!
//! ```text
//!   w0  packet bytes [16:0], error code [31:17]
//!   w1  bypass bytes [3:0], ToS/TC [12:5], DF [13], classification errors
//!       [20:16], hash appended [21], hash bytes [27:22], appended flags [31:28]
//!   w2  application id [15:9]
//!   w3  next header [7:0], pad bytes [15:8], offset [23:16], IP delta [31:24]
//!   w4  SA address low
//!   w5  SA address high
//!   w6  header processing context
//!   w7  previous next header offset [15:0], flags [16], [17], [22], [23]
//!   w8.. bypass data
//! ```

use crate::error::{Result, RingError};

/// Output token words always present.
pub const RESULT_TOKEN_BASIC_WORDS: usize = 4;
/// Output token words including the extension.
pub const RESULT_TOKEN_EXT_WORDS: usize = 8;

const BIT_13: u32 = 1 << 13;
const BIT_16: u32 = 1 << 16;
const BIT_17: u32 = 1 << 17;
const BIT_21: u32 = 1 << 21;
const BIT_22: u32 = 1 << 22;
const BIT_23: u32 = 1 << 23;
const BIT_28: u32 = 1 << 28;
const BIT_29: u32 = 1 << 29;
const BIT_30: u32 = 1 << 30;
const BIT_31: u32 = 1 << 31;

/// Fields of the output token that follow the basic four words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResultTokenExt {
    pub tos_tc: u8,
    pub dont_fragment: bool,
    pub classification_errors: u8,
    pub offset_bytes: u8,
    pub ip_delta_bytes: u8,
    pub sa_addr: u64,
    pub header_proc_context: u32,
    pub next_header_offset: u16,
    pub inbound_ipv6: bool,
    pub from_ethernet: bool,
    pub outbound_ipv6: bool,
    pub inbound_tunnel: bool,
}

/// Decoded output token of a processed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResultToken {
    pub packet_bytes: u32,
    /// Engine error code, 0 on success.
    pub error_code: u16,
    pub bypass_bytes: u8,
    pub hash_appended: bool,
    pub hash_bytes: u8,
    pub bytes_appended: bool,
    pub checksum_appended: bool,
    pub next_header_appended: bool,
    pub length_appended: bool,
    pub application_id: u8,
    pub next_header: u8,
    pub pad_bytes: u8,
    /// Present when the token has at least [`RESULT_TOKEN_EXT_WORDS`] words.
    pub ext: Option<ResultTokenExt>,
}

impl ResultToken {
    /// Decode an output token.
    ///
    /// Fails with [`RingError::Argument`] when fewer than
    /// [`RESULT_TOKEN_BASIC_WORDS`] words are given.
    pub fn parse(words: &[u32]) -> Result<Self> {
        let &[w0, w1, w2, w3, ..] = words else {
            return Err(RingError::Argument("output token shorter than 4 words"));
        };

        let ext = match words.get(4..RESULT_TOKEN_EXT_WORDS) {
            Some(&[w4, w5, w6, w7]) => Some(ResultTokenExt {
                tos_tc: (w1 >> 5) as u8,
                dont_fragment: w1 & BIT_13 != 0,
                classification_errors: ((w1 >> 16) & 0x1F) as u8,
                offset_bytes: (w3 >> 16) as u8,
                ip_delta_bytes: (w3 >> 24) as u8,
                sa_addr: ((w5 as u64) << 32) | w4 as u64,
                header_proc_context: w6,
                next_header_offset: w7 as u16,
                inbound_ipv6: w7 & BIT_16 != 0,
                from_ethernet: w7 & BIT_17 != 0,
                outbound_ipv6: w7 & BIT_22 != 0,
                inbound_tunnel: w7 & BIT_23 != 0,
            }),
            _ => None,
        };

        Ok(Self {
            packet_bytes: w0 & 0x1_FFFF,
            error_code: ((w0 >> 17) & 0x7FFF) as u16,
            bypass_bytes: (w1 & 0xF) as u8,
            hash_appended: w1 & BIT_21 != 0,
            hash_bytes: ((w1 >> 22) & 0x3F) as u8,
            bytes_appended: w1 & BIT_28 != 0,
            checksum_appended: w1 & BIT_29 != 0,
            next_header_appended: w1 & BIT_30 != 0,
            length_appended: w1 & BIT_31 != 0,
            application_id: ((w2 >> 9) & 0x7F) as u8,
            next_header: w3 as u8,
            pad_bytes: (w3 >> 8) as u8,
            ext,
        })
    }

    /// Bypass data words of `words`, when the token carries any.
    pub fn bypass_words(words: &[u32]) -> &[u32] {
        words.get(RESULT_TOKEN_EXT_WORDS..).unwrap_or(&[])
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.error_code != 0
    }
}

/// Bypass data the engine passes through from the input token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassData {
    /// Packet was dropped, `error_flags` holds the reason bits.
    Fail { error_flags: u8 },
    /// Packet passed, header processing details follow.
    Pass {
        tos_tc: u8,
        dont_fragment: bool,
        next_header_offset: u16,
        hdr_proc_ctx_ref: u32,
    },
}

impl BypassData {
    /// Decode one (fail) or two (pass) bypass words.
    pub fn parse(words: &[u32]) -> Result<Self> {
        match *words {
            [w0] => Ok(BypassData::Fail {
                error_flags: (w0 & 0x3) as u8,
            }),
            [w0, w1] => Ok(BypassData::Pass {
                tos_tc: w0 as u8,
                dont_fragment: w0 & (1 << 8) != 0,
                next_header_offset: (w0 >> 8) as u16,
                hdr_proc_ctx_ref: w1,
            }),
            _ => Err(RingError::Argument("bypass data is one or two words")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_fields() {
        let words = [
            (0x21 << 17) | 1500,
            (1 << 31) | (1 << 29) | (20 << 22) | (1 << 21) | 8,
            0x55 << 9,
            (2 << 8) | 50,
        ];
        let t = ResultToken::parse(&words).unwrap();
        assert_eq!(t.packet_bytes, 1500);
        assert_eq!(t.error_code, 0x21);
        assert!(t.is_error());
        assert_eq!(t.bypass_bytes, 8);
        assert!(t.hash_appended);
        assert_eq!(t.hash_bytes, 20);
        assert!(t.length_appended && t.checksum_appended);
        assert!(!t.bytes_appended && !t.next_header_appended);
        assert_eq!(t.application_id, 0x55);
        assert_eq!(t.next_header, 50);
        assert_eq!(t.pad_bytes, 2);
        assert_eq!(t.ext, None);
    }

    #[test]
    fn extension_fields() {
        let words = [
            0,
            (3 << 16) | BIT_13 | (0x2E << 5),
            0,
            (4 << 24) | (14 << 16),
            0x1000,
            0x2,
            0xCAFE,
            BIT_23 | BIT_16 | 0x28,
        ];
        let ext = ResultToken::parse(&words).unwrap().ext.unwrap();
        assert_eq!(ext.tos_tc, 0x2E);
        assert!(ext.dont_fragment);
        assert_eq!(ext.classification_errors, 3);
        assert_eq!(ext.offset_bytes, 14);
        assert_eq!(ext.ip_delta_bytes, 4);
        assert_eq!(ext.sa_addr, 0x2_0000_1000);
        assert_eq!(ext.header_proc_context, 0xCAFE);
        assert_eq!(ext.next_header_offset, 0x28);
        assert!(ext.inbound_ipv6 && ext.inbound_tunnel);
        assert!(!ext.from_ethernet && !ext.outbound_ipv6);
    }

    #[test]
    fn short_token_is_rejected() {
        assert!(matches!(
            ResultToken::parse(&[0, 0, 0]),
            Err(RingError::Argument(_))
        ));
    }

    #[test]
    fn bypass_words_follow_extension() {
        let words = [0, 0, 0, 0, 0, 0, 0, 0, 7, 9];
        assert_eq!(ResultToken::bypass_words(&words), &[7, 9]);
        assert!(ResultToken::bypass_words(&words[..4]).is_empty());
    }

    #[test]
    fn bypass_decode() {
        assert_eq!(
            BypassData::parse(&[0xFF]).unwrap(),
            BypassData::Fail { error_flags: 3 }
        );
        assert_eq!(
            BypassData::parse(&[0x0028_01B8, 0xABCD]).unwrap(),
            BypassData::Pass {
                tos_tc: 0xB8,
                dont_fragment: true,
                next_header_offset: 0x2801,
                hdr_proc_ctx_ref: 0xABCD,
            }
        );
        assert!(BypassData::parse(&[]).is_err());
        assert!(BypassData::parse(&[1, 2, 3]).is_err());
    }
}
