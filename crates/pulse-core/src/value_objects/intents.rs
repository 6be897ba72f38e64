//! Gateway intents bitmask
//!
//! Selects which event groups the gateway delivers to a session.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags! {
    /// Gateway intents bitmask sent with Identify
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u32 {
        const GUILDS = 1 << 0;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_BANS = 1 << 2;
        const GUILD_EMOJIS = 1 << 3;
        const GUILD_INTEGRATIONS = 1 << 4;
        const GUILD_WEBHOOKS = 1 << 5;
        const GUILD_INVITES = 1 << 6;
        const GUILD_VOICE_STATES = 1 << 7;
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const GUILD_MESSAGE_TYPING = 1 << 11;
        const DIRECT_MESSAGES = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        const DIRECT_MESSAGE_TYPING = 1 << 14;
    }
}

impl Intents {
    /// Intents that require explicit enablement on the platform side
    pub const PRIVILEGED: Self = Self::GUILD_MEMBERS.union(Self::GUILD_PRESENCES);

    /// All intents except the privileged ones
    #[must_use]
    pub fn unprivileged() -> Self {
        Self::all().difference(Self::PRIVILEGED)
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::unprivileged()
    }
}

// The wire carries intents as a bare integer
impl Serialize for Intents {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = u32::deserialize(deserializer)?;
        Ok(Self::from_bits_truncate(bits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_bits() {
        assert_eq!(Intents::GUILDS.bits(), 1);
        assert_eq!(Intents::GUILD_MESSAGES.bits(), 512);
        assert_eq!(Intents::all().bits(), 32767);
        assert_eq!(Intents::PRIVILEGED.bits(), 258);
        assert_eq!(Intents::unprivileged().bits(), 32509);
    }

    #[test]
    fn test_serde_as_integer() {
        let json = serde_json::to_string(&Intents::GUILDS.union(Intents::GUILD_MESSAGES)).unwrap();
        assert_eq!(json, "513");

        let back: Intents = serde_json::from_str("513").unwrap();
        assert!(back.contains(Intents::GUILDS));
        assert!(back.contains(Intents::GUILD_MESSAGES));
    }
}
