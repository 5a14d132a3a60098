use crate::enums::AlertDescription;
use crate::error::InvalidMessage;
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::AlertLevel;

#[derive(Clone, Debug)]
pub struct AlertMessagePayload {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Codec for AlertMessagePayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.level.encode(bytes);
        self.description.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let level = AlertLevel::read(r)?;
        let description = AlertDescription::read(r)?;
        r.expect_empty("AlertMessagePayload")
            .map(|_| Self { level, description })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_is_exactly_two_bytes() {
        let alert = AlertMessagePayload::read_bytes(&[0x02, 0x28]).unwrap();
        assert_eq!(alert.level, AlertLevel::Fatal);
        assert_eq!(alert.description, AlertDescription::HandshakeFailure);

        assert!(AlertMessagePayload::read_bytes(&[0x02]).is_err());
        assert_eq!(
            AlertMessagePayload::read_bytes(&[0x01, 0x00, 0x00]).unwrap_err(),
            InvalidMessage::TrailingData("AlertMessagePayload")
        );
    }
}
