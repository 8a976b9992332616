//! IPv4 truncation: pseudonymisation that preserves an address prefix.

use std::net::Ipv4Addr;

use crate::error::{Error, MaskError};

/// Replaces the last `n` octets of an IPv4 address with zeros.
///
/// Fails with `ip-address-invalid` when the input is not a valid IPv4
/// address.
pub fn truncate_ipv4_addr(ip: &str, n: u8) -> Result<String, Error> {
    let parsed: Ipv4Addr = ip
        .parse()
        .map_err(|_| Error::from(MaskError::InvalidIpAddress))?;
    if n == 0 {
        return Ok(ip.to_string());
    }

    let mut octets = parsed.octets();
    for i in 1..=n.min(4) {
        octets[(4 - i) as usize] = 0;
    }
    Ok(Ipv4Addr::from(octets).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_truncate_zeroes_trailing_octets() {
        assert_eq!(truncate_ipv4_addr("192.0.2.40", 0).unwrap(), "192.0.2.40");
        assert_eq!(truncate_ipv4_addr("192.0.2.40", 1).unwrap(), "192.0.2.0");
        assert_eq!(truncate_ipv4_addr("192.0.2.40", 2).unwrap(), "192.0.0.0");
        assert_eq!(truncate_ipv4_addr("192.0.2.40", 3).unwrap(), "192.0.0.0");
        assert_eq!(truncate_ipv4_addr("192.0.2.40", 4).unwrap(), "0.0.0.0");
        assert_eq!(truncate_ipv4_addr("192.0.2.40", 10).unwrap(), "0.0.0.0");
    }

    #[test]
    fn test_invalid_inputs() {
        for input in ["192.0.2.521", "2001:0db8:85a3:0000:0000:8a2e:0370:7334", ""] {
            let err = truncate_ipv4_addr(input, 1).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::IpAddressInvalid);
        }
    }
}
