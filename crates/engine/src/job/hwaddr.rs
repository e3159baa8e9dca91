//! Locally-administered MAC generation (spec §9): first octet's 2nd bit set,
//! 1st bit clear, remaining 46 bits random. Stable across update cycles
//! because the caller persists and re-reads it rather than regenerating.

use rand::RngCore;

pub fn generate() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] = (bytes[0] & 0b1111_1100) | 0b0000_0010;
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_addresses_are_locally_administered_unicast() {
        for _ in 0..100 {
            let addr = generate();
            let first_byte = u8::from_str_radix(&addr[0..2], 16).unwrap();
            assert_eq!(first_byte & 0b0000_0001, 0, "unicast bit must be clear");
            assert_eq!(first_byte & 0b0000_0010, 0b0000_0010, "local bit must be set");
        }
    }

    #[test]
    fn format_is_six_colon_separated_octets() {
        let addr = generate();
        let parts: Vec<&str> = addr.split(':').collect();
        assert_eq!(parts.len(), 6);
        for p in parts {
            assert_eq!(p.len(), 2);
            assert!(u8::from_str_radix(p, 16).is_ok());
        }
    }
}
