use core::{result, str::FromStr};

use crate::time::Duration;
use crate::wire::AcceleratorId;

type Result<T> = result::Result<T, ()>;

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(data: &'a str) -> Parser<'a> {
        Parser {
            data: data.as_bytes(),
            pos: 0,
        }
    }

    fn advance(&mut self) -> Result<u8> {
        match self.data.get(self.pos) {
            Some(&chr) => {
                self.pos += 1;
                Ok(chr)
            }
            None => Err(()),
        }
    }

    fn try_do<F, T>(&mut self, f: F) -> Option<T>
    where
        F: FnOnce(&mut Parser<'a>) -> Result<T>,
    {
        let pos = self.pos;
        match f(self) {
            Ok(res) => Some(res),
            Err(()) => {
                self.pos = pos;
                None
            }
        }
    }

    fn accept_eof(&mut self) -> Result<()> {
        if self.data.len() == self.pos {
            Ok(())
        } else {
            Err(())
        }
    }

    fn until_eof<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Parser<'a>) -> Result<T>,
    {
        let res = f(self)?;
        self.accept_eof()?;
        Ok(res)
    }

    fn accept_char(&mut self, chr: u8) -> Result<()> {
        if self.advance()? == chr {
            Ok(())
        } else {
            Err(())
        }
    }

    fn accept_str(&mut self, string: &[u8]) -> Result<()> {
        for byte in string.iter() {
            self.accept_char(*byte)?;
        }
        Ok(())
    }

    fn accept_digit(&mut self, hex: bool) -> Result<u8> {
        let digit = self.advance()?;
        if digit.is_ascii_digit() {
            Ok(digit - b'0')
        } else if hex && (b'a'..=b'f').contains(&digit) {
            Ok(digit - b'a' + 10)
        } else if hex && (b'A'..=b'F').contains(&digit) {
            Ok(digit - b'A' + 10)
        } else {
            Err(())
        }
    }

    fn accept_number(&mut self, max_digits: usize, max_value: u64, hex: bool) -> Result<u64> {
        let mut value = self.accept_digit(hex)? as u64;
        for _ in 1..max_digits {
            match self.try_do(|p| p.accept_digit(hex)) {
                Some(digit) => {
                    value *= if hex { 16 } else { 10 };
                    value += digit as u64;
                }
                None => break,
            }
        }
        if value < max_value {
            Ok(value)
        } else {
            Err(())
        }
    }

    fn accept_ipv4_octets(&mut self) -> Result<[u8; 4]> {
        let mut octets = [0u8; 4];
        for (n, octet) in octets.iter_mut().enumerate() {
            *octet = self.accept_number(3, 0x100, false)? as u8;
            if n != 3 {
                self.accept_char(b'.')?;
            }
        }
        Ok(octets)
    }

    fn accept_hex_id(&mut self) -> Result<u32> {
        if self.try_do(|p| p.accept_str(b"0x")).is_none() {
            self.accept_str(b"0X")?;
        }
        Ok(self.accept_number(8, 1 << 32, true)? as u32)
    }

    fn accept_accelerator_id(&mut self) -> Result<AcceleratorId> {
        if let Some(bits) = self.try_do(|p| p.accept_hex_id()) {
            return Ok(AcceleratorId::from_bits(bits));
        }
        Ok(AcceleratorId(self.accept_ipv4_octets()?))
    }

    fn accept_duration(&mut self) -> Result<Duration> {
        let value = self.accept_number(9, 1_000_000_000, false)?;
        if self.try_do(|p| p.accept_str(b"ms")).is_some() {
            return Ok(Duration::from_millis(value));
        }
        if self.try_do(|p| p.accept_char(b'h')).is_some() {
            return Ok(Duration::from_secs(value * 3600));
        }
        if self.try_do(|p| p.accept_char(b'm')).is_some() {
            return Ok(Duration::from_secs(value * 60));
        }
        // Plain numbers are seconds.
        let _ = self.try_do(|p| p.accept_char(b's'));
        Ok(Duration::from_secs(value))
    }
}

/// Parse a decimal number no greater than `max_value`.
pub(crate) fn parse_number(s: &str, max_value: u64) -> Result<u64> {
    Parser::new(s).until_eof(|p| p.accept_number(19, max_value.saturating_add(1), false))
}

impl FromStr for AcceleratorId {
    type Err = ();

    /// Parse an accelerator identifier, either as a dotted quad
    /// (`192.168.1.1`) or as a hexadecimal number (`0xc0a80101`).
    fn from_str(s: &str) -> Result<AcceleratorId> {
        Parser::new(s).until_eof(|p| p.accept_accelerator_id())
    }
}

impl FromStr for Duration {
    type Err = ();

    /// Parse a duration: a decimal number optionally followed by a unit,
    /// one of `ms`, `s`, `m` or `h`. A bare number is in seconds.
    fn from_str(s: &str) -> Result<Duration> {
        Parser::new(s).until_eof(|p| p.accept_duration())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_accelerator_id() {
        assert_eq!(
            AcceleratorId::from_str("192.168.1.1"),
            Ok(AcceleratorId::new(192, 168, 1, 1))
        );
        assert_eq!(
            AcceleratorId::from_str("0xc0a80101"),
            Ok(AcceleratorId::new(192, 168, 1, 1))
        );
        assert_eq!(
            AcceleratorId::from_str("0XFFFFFFFF"),
            Ok(AcceleratorId::new(255, 255, 255, 255))
        );
        assert_eq!(AcceleratorId::from_str("0x1"), Ok(AcceleratorId::new(0, 0, 0, 1)));
        assert_eq!(AcceleratorId::from_str(""), Err(()));
        assert_eq!(AcceleratorId::from_str("1.2.3"), Err(()));
        assert_eq!(AcceleratorId::from_str("1.2.3.256"), Err(()));
        assert_eq!(AcceleratorId::from_str("1.2.3.4.5"), Err(()));
        assert_eq!(AcceleratorId::from_str("0x"), Err(()));
        assert_eq!(AcceleratorId::from_str("0x100000000"), Err(()));
    }

    #[test]
    fn test_duration() {
        assert_eq!(Duration::from_str("300"), Ok(Duration::from_secs(300)));
        assert_eq!(Duration::from_str("60s"), Ok(Duration::from_secs(60)));
        assert_eq!(Duration::from_str("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(Duration::from_str("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(Duration::from_str("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(Duration::from_str("5 m"), Err(()));
        assert_eq!(Duration::from_str("m"), Err(()));
        assert_eq!(Duration::from_str("10x"), Err(()));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("2", 255), Ok(2));
        assert_eq!(parse_number("255", 255), Ok(255));
        assert_eq!(parse_number("256", 255), Err(()));
        assert_eq!(parse_number("-1", 255), Err(()));
        assert_eq!(parse_number("", 255), Err(()));
    }
}
