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

#![no_main]

use eip202_ring::{BypassData, ResultToken};
use libfuzzer_sys::fuzz_target;

// Output tokens come straight from engine-written DMA memory, so decoding has
// to cope with any word pattern and any length.
fuzz_target!(|words: Vec<u32>| {
    match ResultToken::parse(&words) {
        Ok(token) => {
            assert!(words.len() >= 4);
            assert_eq!(token.ext.is_some(), words.len() >= 8);
            assert!(token.application_id < 0x80);
            assert_eq!(token.is_error(), token.error_code != 0);
        }
        Err(_) => assert!(words.len() < 4),
    }

    let bypass = ResultToken::bypass_words(&words);
    assert_eq!(bypass.len(), words.len().saturating_sub(8));

    match BypassData::parse(bypass) {
        Ok(BypassData::Fail { error_flags }) => {
            assert_eq!(bypass.len(), 1);
            assert!(error_flags < 4);
        }
        Ok(BypassData::Pass { .. }) => assert_eq!(bypass.len(), 2),
        Err(_) => assert!(!matches!(bypass.len(), 1 | 2)),
    }
});
