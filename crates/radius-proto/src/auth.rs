use crate::packet::{Packet, PacketError};
use rand::Rng;

/// Generate a random Request Authenticator (16 bytes) per RFC 2865 Section 3
pub fn generate_request_authenticator() -> [u8; 16] {
    let mut authenticator = [0u8; 16];
    rand::rng().fill(&mut authenticator);
    authenticator
}

/// MD5(Code + ID + Length + `authenticator` + Attributes + Secret)
fn digest_packet(
    packet: &Packet,
    authenticator: &[u8; 16],
    secret: &[u8],
) -> Result<[u8; 16], PacketError> {
    let length = packet.length();
    let mut data = Vec::with_capacity(length + secret.len());
    data.push(packet.code.as_u8());
    data.push(packet.identifier);
    data.extend_from_slice(&(length as u16).to_be_bytes());
    data.extend_from_slice(authenticator);
    for attr in &packet.attributes {
        attr.encode_into(&mut data)?;
    }
    data.extend_from_slice(secret);

    Ok(md5::compute(&data).0)
}

/// Calculate Response Authenticator per RFC 2865 Section 3
///
/// Response Authenticator = MD5(Code + ID + Length + Request Authenticator + Attributes + Secret)
pub fn calculate_response_authenticator(
    packet: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> Result<[u8; 16], PacketError> {
    digest_packet(packet, request_authenticator, secret)
}

/// Calculate the Request Authenticator of an Accounting-Request (RFC 2866 Section 3)
///
/// Same digest as a response authenticator, taken over sixteen zero octets in
/// place of the authenticator field.
pub fn calculate_accounting_request_authenticator(
    packet: &Packet,
    secret: &[u8],
) -> Result<[u8; 16], PacketError> {
    digest_packet(packet, &[0u8; 16], secret)
}

/// Verify that a response carries the authenticator expected for the request
///
/// An attribute that cannot be encoded counts as a mismatch.
pub fn verify_response_authenticator(
    response: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> bool {
    calculate_response_authenticator(response, request_authenticator, secret)
        .map(|expected| expected == response.authenticator)
        .unwrap_or(false)
}

fn hiding_pad(secret: &[u8], previous: &[u8]) -> [u8; 16] {
    let mut data = Vec::with_capacity(secret.len() + previous.len());
    data.extend_from_slice(secret);
    data.extend_from_slice(previous);
    md5::compute(&data).0
}

/// Hide the User-Password attribute per RFC 2865 Section 5.2
///
/// The password is zero-padded to a multiple of 16 bytes (at least one
/// block), then each block is XORed with MD5(secret + previous ciphertext
/// block), seeded with the Request Authenticator.
pub fn encrypt_user_password(password: &str, secret: &[u8], authenticator: &[u8; 16]) -> Vec<u8> {
    let mut padded = password.as_bytes().to_vec();
    let blocks = padded.len().div_ceil(16).max(1);
    padded.resize(blocks * 16, 0);

    let mut result = Vec::with_capacity(padded.len());
    let mut previous: [u8; 16] = *authenticator;

    for chunk in padded.chunks(16) {
        let pad = hiding_pad(secret, &previous);
        for (i, byte) in chunk.iter().enumerate() {
            previous[i] = byte ^ pad[i];
        }
        result.extend_from_slice(&previous);
    }

    result
}

/// Reveal a hidden User-Password attribute per RFC 2865 Section 5.2
pub fn decrypt_user_password(
    encrypted: &[u8],
    secret: &[u8],
    authenticator: &[u8; 16],
) -> Result<String, PacketError> {
    if encrypted.is_empty() || encrypted.len() % 16 != 0 {
        return Err(PacketError::AttributeError(
            "Invalid encrypted password length".to_string(),
        ));
    }

    let mut result = Vec::with_capacity(encrypted.len());
    let mut previous: &[u8] = authenticator;

    for chunk in encrypted.chunks(16) {
        let pad = hiding_pad(secret, previous);
        result.extend(chunk.iter().zip(pad.iter()).map(|(c, p)| c ^ p));
        previous = chunk;
    }

    while result.last() == Some(&0) {
        result.pop();
    }

    String::from_utf8(result)
        .map_err(|e| PacketError::AttributeError(format!("Invalid UTF-8 in password: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{Attribute, AttributeType};
    use crate::packet::Code;

    #[test]
    fn test_generate_authenticator() {
        let auth1 = generate_request_authenticator();
        let auth2 = generate_request_authenticator();
        assert_ne!(auth1, auth2);
    }

    #[test]
    fn test_password_encryption_decryption() {
        let password = "a password longer than one block";
        let secret = b"sharedsecret";
        let authenticator = [1u8; 16];

        let encrypted = encrypt_user_password(password, secret, &authenticator);
        assert_eq!(encrypted.len(), 32);
        let decrypted = decrypt_user_password(&encrypted, secret, &authenticator).unwrap();

        assert_eq!(password, decrypted);
    }

    #[test]
    fn test_password_encryption_empty() {
        let encrypted = encrypt_user_password("", b"sharedsecret", &[1u8; 16]);
        assert_eq!(encrypted.len(), 16);
    }

    #[test]
    fn test_password_exact_block() {
        let encrypted = encrypt_user_password("0123456789abcdef", b"s", &[7u8; 16]);
        assert_eq!(encrypted.len(), 16);
    }

    #[test]
    fn test_response_authenticator() {
        let secret = b"sharedsecret";
        let request_auth = [1u8; 16];
        let mut packet = Packet::new(Code::AccessAccept, 42, [0u8; 16]);
        packet.add_attribute(Attribute::string(AttributeType::ReplyMessage as u8, "ok").unwrap());

        packet.authenticator =
            calculate_response_authenticator(&packet, &request_auth, secret).unwrap();

        assert!(verify_response_authenticator(&packet, &request_auth, secret));
        assert!(!verify_response_authenticator(&packet, &request_auth, b"other"));
    }

    #[test]
    fn test_accounting_request_authenticator() {
        let secret = b"sharedsecret";
        let mut packet = Packet::new(Code::AccountingRequest, 9, [0u8; 16]);
        packet.add_attribute(Attribute::integer(AttributeType::AcctStatusType as u8, 1).unwrap());

        let first = calculate_accounting_request_authenticator(&packet, secret).unwrap();
        packet.authenticator = first;
        // The stored authenticator does not feed into its own calculation.
        let second = calculate_accounting_request_authenticator(&packet, secret).unwrap();
        assert_eq!(first, second);
    }
}
