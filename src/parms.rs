//! `key=value;key=value` parameter strings exchanged with the framework.

use std::collections::HashMap;

use crate::error::{HalError, Result};
use crate::route::HwStream;
use crate::types::AudioFormat;

/// Routing device mask for a stream.
pub const KEY_ROUTING: &str = "routing";
/// Logical capture source of an input stream.
pub const KEY_INPUT_SOURCE: &str = "input_source";
/// Supported-formats stream query.
pub const KEY_SUP_FORMATS: &str = "sup_formats";
/// Voice trigger control: "0" disable, "1" enable, "2" triggered.
pub const KEY_VOICE_TRIGGER: &str = "voice_trigger";
/// Microphone device used when arming the voice trigger.
pub const KEY_VOICE_TRIGGER_MIC: &str = "voice_trigger_mic";

/// Parsed parameter string. A later occurrence of a key replaces an earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvPairs {
    pairs: HashMap<String, String>,
}

impl KvPairs {
    pub fn parse(kvpairs: &str) -> Self {
        let pairs = kvpairs
            .split(';')
            .filter_map(|item| {
                let (key, value) = item.split_once('=').unwrap_or((item, ""));
                (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
            })
            .collect();
        Self { pairs }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    /// Integer value of a key, parsed leniently: leading whitespace and sign,
    /// then as many digits as present. A value with no digits reads as 0.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).map(parse_leading_int)
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get_int(key).map(|v| v as u32)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

pub(crate) fn parse_leading_int(value: &str) -> i64 {
    let s = value.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let magnitude = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| acc.wrapping_mul(10).wrapping_add(i64::from(d - b'0')));
    if negative { -magnitude } else { magnitude }
}

/// Offer every `key=value` pair to the handle's use-case applier.
///
/// Succeeds if at least one pair was accepted; pairs with an empty value are
/// skipped.
pub fn invoke_use_cases(hw: Option<&dyn HwStream>, kvpairs: &str) -> Result<()> {
    let Some(hw) = hw else {
        return Err(HalError::NotSupported("no stream for use-cases"));
    };

    log::trace!("invoke_use_cases '{}'", kvpairs);

    let mut applied = false;
    for item in kvpairs.split(';') {
        if let Some((key, value)) = item.split_once('=') {
            if value.is_empty() {
                continue;
            }
            match hw.apply_use_case(key, value) {
                Ok(()) => applied = true,
                Err(e) => log::trace!("use-case {}={} not applied: {}", key, value, e),
            }
        }
    }

    if applied {
        Ok(())
    } else {
        Err(HalError::NotSupported("no recognised use-case"))
    }
}

/// Answer a stream `get_parameters` query.
///
/// Only the supported-formats key is recognised; other keys are dropped.
pub fn stream_query_reply(keys: &str, format: AudioFormat) -> String {
    let mut reply = String::new();
    for key in keys.split(';') {
        if key == KEY_SUP_FORMATS {
            log::debug!("get_parameters {} -> {:?}", key, format);
            if !reply.is_empty() {
                reply.push(';');
            }
            reply.push_str(KEY_SUP_FORMATS);
            reply.push('=');
            reply.push_str(format.symbolic_name());
        }
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let kv = KvPairs::parse("routing=2;input_source=6;flag;=orphan;routing=4");
        assert_eq!(kv.get("routing"), Some("4"));
        assert_eq!(kv.get("input_source"), Some("6"));
        assert_eq!(kv.get("flag"), Some(""));
        assert_eq!(kv.get(""), None);
        assert_eq!(kv.get("missing"), None);
    }

    #[test]
    fn test_parse_empty() {
        assert!(KvPairs::parse("").is_empty());
        assert!(KvPairs::parse(";;").is_empty());
    }

    #[test]
    fn test_lenient_int() {
        assert_eq!(parse_leading_int("42"), 42);
        assert_eq!(parse_leading_int("  -7abc"), -7);
        assert_eq!(parse_leading_int("+3"), 3);
        assert_eq!(parse_leading_int("abc"), 0);
        assert_eq!(parse_leading_int(""), 0);

        let kv = KvPairs::parse("routing=2147483652");
        assert_eq!(kv.get_u32("routing"), Some(0x8000_0004));
    }

    #[test]
    fn test_query_reply() {
        assert_eq!(
            stream_query_reply("sup_formats", AudioFormat::Pcm16Bit),
            "sup_formats=AUDIO_FORMAT_PCM_16_BIT"
        );
        assert_eq!(
            stream_query_reply("foo;sup_formats", AudioFormat::Other(7)),
            "sup_formats=AUDIO_FORMAT_INVALID"
        );
        assert_eq!(stream_query_reply("foo;bar", AudioFormat::Pcm16Bit), "");
    }
}
