use crate::{HidError, constants::BD_ADDR_LENGTH};

/// A Bluetooth Device Address (`BD_ADDR`) wrapper for type safety
///
/// Bytes are stored in HCI (little-endian) order, which splits the address into
/// its three sub-fields:
///
/// | bytes  | field | width   |
/// |--------|-------|---------|
/// | `0..3` | LAP   | 24 bits |
/// | `3`    | UAP   | 8 bits  |
/// | `4..6` | NAP   | 16 bits |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BluetoothAddress(pub [u8; BD_ADDR_LENGTH]);

impl BluetoothAddress {
    /// The all-zero address, never valid for a remote peer
    pub const ZERO: Self = Self([0; BD_ADDR_LENGTH]);

    /// Create a new Bluetooth address from bytes
    #[must_use]
    pub const fn new(addr: [u8; BD_ADDR_LENGTH]) -> Self {
        Self(addr)
    }

    /// Build an address from its LAP, UAP and NAP sub-fields
    ///
    /// Only the low 24 bits of `lap` are used.
    #[must_use]
    pub const fn from_parts(lap: u32, uap: u8, nap: u16) -> Self {
        let lap = lap.to_le_bytes();
        let nap = nap.to_le_bytes();
        Self([lap[0], lap[1], lap[2], uap, nap[0], nap[1]])
    }

    /// Lower Address Part (24 bits)
    #[must_use]
    pub const fn lap(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], 0])
    }

    /// Upper Address Part (8 bits)
    #[must_use]
    pub const fn uap(&self) -> u8 {
        self.0[3]
    }

    /// Non-significant Address Part (16 bits)
    #[must_use]
    pub const fn nap(&self) -> u16 {
        u16::from_le_bytes([self.0[4], self.0[5]])
    }

    /// Returns `true` if every sub-field is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.lap() == 0 && self.uap() == 0 && self.nap() == 0
    }

    /// Get the raw address bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; BD_ADDR_LENGTH] {
        &self.0
    }

    /// Format the address as a colon-separated hex string
    #[must_use]
    pub fn format_hex(&self) -> heapless::String<17> {
        const HEX_CHARS: [char; 16] = [
            '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F',
        ];

        let mut result = heapless::String::new();
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                result.push(':').ok();
            }
            result.push(HEX_CHARS[(byte >> 4) as usize]).ok();
            result.push(HEX_CHARS[(byte & 0x0F) as usize]).ok();
        }
        result
    }

    /// Parse a Bluetooth address from a colon-separated hex string
    ///
    /// # Errors
    /// Returns `HidError::InvalidParameter` if the string is not exactly 17 characters
    /// long or contains anything other than hex pairs separated by colons
    pub fn from_hex(hex: &str) -> Result<Self, HidError> {
        if hex.len() != 17 || !hex.chars().all(|c| c.is_ascii_hexdigit() || c == ':') {
            return Err(HidError::InvalidParameter);
        }

        let mut bytes = [0u8; BD_ADDR_LENGTH];
        for (i, byte) in hex.split(':').enumerate() {
            if i >= BD_ADDR_LENGTH || byte.len() != 2 {
                return Err(HidError::InvalidParameter);
            }
            bytes[i] = u8::from_str_radix(byte, 16).map_err(|_| HidError::InvalidParameter)?;
        }
        Ok(Self(bytes))
    }

    /// Validate an address supplied for a remote peer
    ///
    /// # Errors
    /// Returns `HidError::InvalidAddress` for the zero address
    pub fn validate(self) -> Result<Self, HidError> {
        if self.is_zero() {
            Err(HidError::InvalidAddress)
        } else {
            Ok(self)
        }
    }
}

impl From<[u8; BD_ADDR_LENGTH]> for BluetoothAddress {
    fn from(addr: [u8; BD_ADDR_LENGTH]) -> Self {
        Self(addr)
    }
}

impl From<BluetoothAddress> for [u8; BD_ADDR_LENGTH] {
    fn from(addr: BluetoothAddress) -> Self {
        addr.0
    }
}

impl From<BluetoothAddress> for bt_hci::param::BdAddr {
    fn from(addr: BluetoothAddress) -> Self {
        bt_hci::param::BdAddr::new(addr.0)
    }
}

impl From<BluetoothAddress> for heapless::String<17> {
    fn from(addr: BluetoothAddress) -> Self {
        addr.format_hex()
    }
}

impl TryFrom<&str> for BluetoothAddress {
    type Error = HidError;

    fn try_from(hex: &str) -> Result<Self, Self::Error> {
        BluetoothAddress::from_hex(hex)
    }
}

impl TryFrom<&[u8]> for BluetoothAddress {
    type Error = HidError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let addr: [u8; BD_ADDR_LENGTH] =
            bytes.try_into().map_err(|_| HidError::InvalidParameter)?;
        Ok(BluetoothAddress(addr))
    }
}

impl TryFrom<bt_hci::param::BdAddr> for BluetoothAddress {
    type Error = HidError;

    fn try_from(bd_addr: bt_hci::param::BdAddr) -> Result<Self, Self::Error> {
        bd_addr.raw().try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bluetooth_address_creation() {
        let addr = BluetoothAddress::new([0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);
        assert_eq!(addr.as_bytes(), &[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);
    }

    #[test]
    fn test_bluetooth_address_sub_fields() {
        let addr = BluetoothAddress::new([0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);
        assert_eq!(addr.lap(), 0x0056_3412);
        assert_eq!(addr.uap(), 0x78);
        assert_eq!(addr.nap(), 0xBC9A);

        let rebuilt = BluetoothAddress::from_parts(addr.lap(), addr.uap(), addr.nap());
        assert_eq!(rebuilt, addr);
    }

    #[test]
    fn test_from_parts_ignores_lap_high_byte() {
        let addr = BluetoothAddress::from_parts(0xFF9E_8B33, 0x01, 0x0002);
        assert_eq!(addr.lap(), 0x009E_8B33);
        assert_eq!(addr.as_bytes(), &[0x33, 0x8B, 0x9E, 0x01, 0x02, 0x00]);
    }

    #[test]
    fn test_zero_address() {
        let zero = BluetoothAddress::new([0, 0, 0, 0, 0, 0]);
        assert!(zero.is_zero());
        assert_eq!(zero, BluetoothAddress::ZERO);
        assert_eq!(zero.validate(), Err(HidError::InvalidAddress));

        // A single non-zero sub-field is enough to make the address valid
        assert!(!BluetoothAddress::from_parts(0, 1, 0).is_zero());
        assert!(!BluetoothAddress::from_parts(0, 0, 1).is_zero());
        assert!(!BluetoothAddress::from_parts(1, 0, 0).is_zero());
        assert!(BluetoothAddress::from_parts(1, 0, 0).validate().is_ok());
    }

    #[test]
    fn test_bluetooth_address_format_hex() {
        let addr = BluetoothAddress::new([0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);
        assert_eq!(addr.format_hex().as_str(), "12:34:56:78:9A:BC");

        let addr_max = BluetoothAddress::new([0xFF; 6]);
        assert_eq!(addr_max.format_hex().as_str(), "FF:FF:FF:FF:FF:FF");

        let addr_mixed = BluetoothAddress::new([0x0A, 0xB1, 0x2C, 0xD3, 0x4E, 0xF5]);
        assert_eq!(addr_mixed.format_hex().as_str(), "0A:B1:2C:D3:4E:F5");
    }

    #[test]
    fn test_bluetooth_address_from_hex() {
        let addr = BluetoothAddress::from_hex("12:34:56:78:9a:BC").unwrap();
        assert_eq!(addr.as_bytes(), &[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);

        assert!(BluetoothAddress::from_hex("12:34:56:78:9A").is_err());
        assert!(BluetoothAddress::from_hex("12-34-56-78-9A-BC").is_err());
        assert!(BluetoothAddress::from_hex("1234:56:78:9A:BC:").is_err());
        assert!(BluetoothAddress::from_hex("GG:34:56:78:9A:BC").is_err());
    }

    #[test]
    fn test_bluetooth_address_conversions() {
        let bytes = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC];

        let addr: BluetoothAddress = bytes.into();
        assert_eq!(addr.as_bytes(), &bytes);

        let converted_bytes: [u8; 6] = addr.into();
        assert_eq!(converted_bytes, bytes);

        let bd_addr: bt_hci::param::BdAddr = addr.into();
        assert_eq!(bd_addr.raw(), bytes);
        let back = BluetoothAddress::try_from(bd_addr).unwrap();
        assert_eq!(back, addr);

        let addr_from_str: BluetoothAddress = "12:34:56:78:9A:BC".try_into().unwrap();
        assert_eq!(addr_from_str, addr);

        let hex_string: heapless::String<17> = addr.into();
        assert_eq!(hex_string.as_str(), "12:34:56:78:9A:BC");
    }

    #[test]
    fn test_bluetooth_address_try_from_slice() {
        let bytes = &[0x12u8, 0x34, 0x56, 0x78, 0x9A, 0xBC][..];
        let addr = BluetoothAddress::try_from(bytes).unwrap();
        assert_eq!(addr.as_bytes(), &[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);

        assert!(BluetoothAddress::try_from(&[0x12u8, 0x34, 0x56][..]).is_err());
        assert!(BluetoothAddress::try_from(&[0u8; 8][..]).is_err());
    }
}
