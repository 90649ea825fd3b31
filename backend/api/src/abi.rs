//! Contract ABI call encoding for the issuance contract.
//!
//! Only the shapes the entry points need are supported: `uint256`,
//! `string` and `string[]`, laid out with the standard head/tail scheme.

use tiny_keccak::{Hasher, Keccak};

use crate::ledger::{LedgerError, SubmitProjectCall};

const WORD: usize = 32;

const SUBMIT_PROJECT: &str = "submitProject(string,string,string,string[],string[],string[])";
const APPROVE_IMAGE: &str = "approveImage(uint256,uint256,uint256)";
const APPROVE_SUBMISSION: &str = "approveSubmission(uint256)";
const GET_IMAGE: &str = "getImage(uint256,uint256)";

pub fn keccak256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(input);
    hasher.finalize(&mut out);
    out
}

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// `topics[0]` of logs emitted by the event with this canonical signature.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

pub fn submit_project_data(call: &SubmitProjectCall) -> String {
    let args = vec![
        encode_string(&call.ngo_name),
        encode_string(&call.email),
        encode_string(&call.title),
        encode_string_array(&call.content_hashes),
        encode_string_array(&call.lats),
        encode_string_array(&call.lngs),
    ];
    to_call_data(selector(SUBMIT_PROJECT), encode_dynamic_tuple(args))
}

pub fn approve_image_data(submission_id: u64, image_index: u64, credits: u64) -> String {
    let mut body = Vec::with_capacity(3 * WORD);
    body.extend_from_slice(&encode_u256(submission_id));
    body.extend_from_slice(&encode_u256(image_index));
    body.extend_from_slice(&encode_u256(credits));
    to_call_data(selector(APPROVE_IMAGE), body)
}

pub fn approve_submission_data(submission_id: u64) -> String {
    to_call_data(selector(APPROVE_SUBMISSION), encode_u256(submission_id).to_vec())
}

pub fn get_image_data(submission_id: u64, image_index: u64) -> String {
    let mut body = Vec::with_capacity(2 * WORD);
    body.extend_from_slice(&encode_u256(submission_id));
    body.extend_from_slice(&encode_u256(image_index));
    to_call_data(selector(GET_IMAGE), body)
}

/// Split ABI return data into `0x`-prefixed 32-byte words.
pub fn split_words(data: &str) -> Result<Vec<String>, LedgerError> {
    let raw = data.strip_prefix("0x").unwrap_or(data);
    if raw.len() % (2 * WORD) != 0 || hex::decode(raw).is_err() {
        return Err(LedgerError::Decode(format!("malformed return data {data}")));
    }
    Ok(raw
        .as_bytes()
        .chunks(2 * WORD)
        .map(|chunk| format!("0x{}", String::from_utf8_lossy(chunk)))
        .collect())
}

/// Decode a 32-byte big-endian word (hex, with or without `0x`) that must
/// fit in a `u64`.
pub fn decode_u64_word(word: &str) -> Result<u64, LedgerError> {
    let raw = word.strip_prefix("0x").unwrap_or(word);
    let bytes = hex::decode(raw).map_err(|e| LedgerError::Decode(format!("bad word {word}: {e}")))?;
    if bytes.len() < WORD {
        return Err(LedgerError::Decode(format!("short word {word}")));
    }
    let (high, low) = bytes[..WORD].split_at(WORD - 8);
    if high.iter().any(|b| *b != 0) {
        return Err(LedgerError::Decode(format!("value does not fit in u64: {word}")));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(low);
    Ok(u64::from_be_bytes(buf))
}

/// Parse a JSON-RPC quantity such as `0x1b4`.
pub fn parse_quantity(value: &str) -> Result<u64, LedgerError> {
    let raw = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(raw, 16).map_err(|e| LedgerError::Decode(format!("bad quantity {value}: {e}")))
}

fn to_call_data(selector: [u8; 4], body: Vec<u8>) -> String {
    let mut data = Vec::with_capacity(4 + body.len());
    data.extend_from_slice(&selector);
    data.extend_from_slice(&body);
    format!("0x{}", hex::encode(data))
}

fn encode_u256(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

fn encode_string(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let padded = bytes.len().div_ceil(WORD) * WORD;
    let mut out = Vec::with_capacity(WORD + padded);
    out.extend_from_slice(&encode_u256(bytes.len() as u64));
    out.extend_from_slice(bytes);
    out.resize(WORD + padded, 0);
    out
}

fn encode_string_array(items: &[String]) -> Vec<u8> {
    let mut out = encode_u256(items.len() as u64).to_vec();
    out.extend(encode_dynamic_tuple(
        items.iter().map(|s| encode_string(s)).collect(),
    ));
    out
}

/// Head of offsets followed by the tails, for a sequence of dynamic values.
/// Offsets are relative to the start of the head.
fn encode_dynamic_tuple(tails: Vec<Vec<u8>>) -> Vec<u8> {
    let head_len = tails.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut offset = head_len;
    for tail in &tails {
        head.extend_from_slice(&encode_u256(offset as u64));
        offset += tail.len();
    }
    let mut out = head;
    for tail in tails {
        out.extend(tail);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(n: u64) -> String {
        format!("{n:064x}")
    }

    #[test]
    fn keccak_known_values() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(
            event_topic("ProjectSubmitted(uint256,address,string)"),
            "0x55da7e5e16004f5167a21b509f0d75bc212d7aa3f01efa5536d3aeaae0c849b3"
        );
    }

    #[test]
    fn get_image_layout() {
        assert_eq!(
            get_image_data(2, 5),
            format!("0xed6f29ca{}{}", word(2), word(5))
        );
    }

    #[test]
    fn return_data_splits_into_words() {
        let data = format!("0x{}{}", word(1), word(0x20));
        assert_eq!(
            split_words(&data).unwrap(),
            vec![format!("0x{}", word(1)), format!("0x{}", word(0x20))]
        );
        assert!(split_words("0x").unwrap().is_empty());
        assert!(split_words("0x1234").is_err());
    }

    #[test]
    fn approve_submission_layout() {
        assert_eq!(approve_submission_data(7), format!("0x80fd0fb3{}", word(7)));
    }

    #[test]
    fn approve_image_layout() {
        let data = approve_image_data(3, 1, 25);
        assert_eq!(
            data,
            format!("0xf976ba01{}{}{}", word(3), word(1), word(25))
        );
    }

    #[test]
    fn string_array_matches_reference_layout() {
        let items: Vec<String> = ["one", "two", "three"].iter().map(|s| s.to_string()).collect();
        let encoded = hex::encode(encode_string_array(&items));
        let pad = |s: &str| format!("{:0<64}", hex::encode(s));
        let expected = [
            word(3),
            word(0x60),
            word(0xa0),
            word(0xe0),
            word(3),
            pad("one"),
            word(3),
            pad("two"),
            word(5),
            pad("three"),
        ]
        .concat();
        assert_eq!(encoded, expected);
    }

    #[test]
    fn submit_project_heads_point_at_tails() {
        let call = SubmitProjectCall {
            ngo_name: "Green Roots".into(),
            email: "ngo@example.org".into(),
            title: "Mangrove belt".into(),
            content_hashes: vec!["QmA".into(), "QmB".into()],
            lats: vec!["12.9".into(), "13.0".into()],
            lngs: vec!["77.5".into(), "77.6".into()],
        };
        let data = submit_project_data(&call);
        assert!(data.starts_with("0x5cf74988"));

        let body = hex::decode(&data[10..]).unwrap();
        // Six dynamic arguments: the first tail starts right after six head words.
        assert_eq!(decode_u64_word(&hex::encode(&body[..32])).unwrap(), 6 * 32);
        // "Green Roots" is 11 bytes: one length word plus one data word.
        assert_eq!(decode_u64_word(&hex::encode(&body[32..64])).unwrap(), 8 * 32);
        assert_eq!(body.len() % 32, 0);
    }

    #[test]
    fn decode_word_rejects_overflow() {
        assert_eq!(decode_u64_word(&format!("0x{}", word(42))).unwrap(), 42);
        let huge = format!("0x01{}", "0".repeat(62));
        assert!(decode_u64_word(&huge).is_err());
        assert!(decode_u64_word("0x1234").is_err());
    }

    #[test]
    fn parse_hex_quantity() {
        assert_eq!(parse_quantity("0x1b4").unwrap(), 436);
        assert!(parse_quantity("0xzz").is_err());
    }
}
