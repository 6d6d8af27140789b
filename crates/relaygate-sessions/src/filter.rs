//! Decides which inbound messages are worth relaying.
//!
//! Only direct one-to-one messages written by someone other than the
//! session's own account pass.

use relaygate_core::RawMessage;

const GROUP_SUFFIX: &str = "@g.us";
const BROADCAST_SUFFIX: &str = "@broadcast";
const CHANNEL_SUFFIX: &str = "@newsletter";
const DIRECT_SUFFIX: &str = "@c.us";

/// Why a message was not relayed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    Broadcast,
    Group,
    Channel,
    SelfEcho,
    NotDirect,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Group => "group",
            Self::Channel => "channel",
            Self::SelfEcho => "self_echo",
            Self::NotDirect => "not_direct",
        }
    }
}

/// Classify a raw message. `Ok(())` means relay it.
pub fn classify(raw: &RawMessage) -> Result<(), Rejection> {
    let from = raw.from.trim();
    if from.ends_with(BROADCAST_SUFFIX) {
        return Err(Rejection::Broadcast);
    }
    if from.ends_with(GROUP_SUFFIX) {
        return Err(Rejection::Group);
    }
    if from.ends_with(CHANNEL_SUFFIX) {
        return Err(Rejection::Channel);
    }
    if raw.from_me {
        return Err(Rejection::SelfEcho);
    }
    if from.len() > DIRECT_SUFFIX.len() && from.ends_with(DIRECT_SUFFIX) {
        Ok(())
    } else {
        Err(Rejection::NotDirect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from: &str, from_me: bool) -> RawMessage {
        RawMessage {
            id: None,
            from: from.into(),
            to: "5491100000000@c.us".into(),
            body: "hola".into(),
            from_me,
            notify_name: None,
        }
    }

    #[test]
    fn accepts_direct_external_message() {
        assert_eq!(classify(&msg("5493484699717@c.us", false)), Ok(()));
    }

    #[test]
    fn rejects_status_broadcast() {
        assert_eq!(classify(&msg("status@broadcast", false)), Err(Rejection::Broadcast));
    }

    #[test]
    fn rejects_group() {
        assert_eq!(
            classify(&msg("120363025246125486@g.us", false)),
            Err(Rejection::Group)
        );
    }

    #[test]
    fn rejects_channel_feed() {
        assert_eq!(
            classify(&msg("120363144038483540@newsletter", false)),
            Err(Rejection::Channel)
        );
    }

    #[test]
    fn rejects_self_echo() {
        assert_eq!(classify(&msg("5493484699717@c.us", true)), Err(Rejection::SelfEcho));
    }

    #[test]
    fn scope_rejections_win_over_self_echo() {
        assert_eq!(classify(&msg("123@g.us", true)), Err(Rejection::Group));
    }

    #[test]
    fn rejects_unknown_or_bare_addresses() {
        assert_eq!(classify(&msg("5493484699717", false)), Err(Rejection::NotDirect));
        assert_eq!(classify(&msg("", false)), Err(Rejection::NotDirect));
        assert_eq!(classify(&msg("@c.us", false)), Err(Rejection::NotDirect));
        assert_eq!(classify(&msg("1234@lid", false)), Err(Rejection::NotDirect));
    }
}
