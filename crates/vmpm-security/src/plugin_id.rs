use anyhow::Result;
use sha2::{Digest, Sha256};
use vmpm_core::VmpmError;

const PLUGIN_ID_LEN: usize = 32;

const CHECKSUM_LEN: usize = 4;
const BASE58_ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Derives the identifier the node uses to find a plugin binary:
/// the name zero-padded to 32 bytes, rendered as CB58.
pub fn compute_plugin_id(vm_name: &str) -> Result<String> {
    let raw = vm_name.as_bytes();
    if raw.len() > PLUGIN_ID_LEN {
        return Err(VmpmError::InvalidName {
            name: vm_name.to_string(),
            reason: format!(
                "VM name must be <= {PLUGIN_ID_LEN} bytes, found {}",
                raw.len()
            ),
        }
        .into());
    }

    let mut padded = [0_u8; PLUGIN_ID_LEN];
    padded[..raw.len()].copy_from_slice(raw);
    Ok(encode_cb58(&padded))
}

/// Base58 of the payload followed by the last four bytes of its SHA-256.
fn encode_cb58(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    let mut checked = Vec::with_capacity(payload.len() + CHECKSUM_LEN);
    checked.extend_from_slice(payload);
    checked.extend_from_slice(&digest[digest.len() - CHECKSUM_LEN..]);
    encode_base58(&checked)
}

fn encode_base58(input: &[u8]) -> String {
    let leading_zeros = input.iter().take_while(|byte| **byte == 0).count();

    // little-endian base58 digits
    let mut digits: Vec<u8> = Vec::with_capacity(input.len() * 138 / 100 + 1);
    for byte in &input[leading_zeros..] {
        let mut carry = u32::from(*byte);
        for digit in digits.iter_mut() {
            carry += u32::from(*digit) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }

    let mut encoded = String::with_capacity(leading_zeros + digits.len());
    encoded.extend(std::iter::repeat('1').take(leading_zeros));
    encoded.extend(
        digits
            .iter()
            .rev()
            .map(|digit| BASE58_ALPHABET[usize::from(*digit)] as char),
    );
    encoded
}
