//! Static API error-code table
//!
//! Read-only lookup from well-known server error codes to their messages,
//! used when a 4xx body carries a code without a message. Built at compile
//! time; never mutated.

/// Look up the message for a well-known API error code
#[must_use]
pub fn message_for(code: i64) -> Option<&'static str> {
    match code {
        0 => Some("General error"),
        10001 => Some("Unknown account"),
        10002 => Some("Unknown application"),
        10003 => Some("Unknown channel"),
        10004 => Some("Unknown guild"),
        10005 => Some("Unknown integration"),
        10006 => Some("Unknown invite"),
        10007 => Some("Unknown member"),
        10008 => Some("Unknown message"),
        10009 => Some("Unknown permission overwrite"),
        10011 => Some("Unknown role"),
        10012 => Some("Unknown token"),
        10013 => Some("Unknown user"),
        10014 => Some("Unknown emoji"),
        10015 => Some("Unknown webhook"),
        20001 => Some("Bots cannot use this endpoint"),
        20002 => Some("Only bots can use this endpoint"),
        30001 => Some("Maximum number of guilds reached"),
        30003 => Some("Maximum number of pins reached"),
        30005 => Some("Maximum number of guild roles reached"),
        30010 => Some("Maximum number of reactions reached"),
        40001 => Some("Unauthorized"),
        40002 => Some("You need to verify your account"),
        50001 => Some("Missing access"),
        50002 => Some("Invalid account type"),
        50003 => Some("Cannot execute action on a DM channel"),
        50004 => Some("Guild widget disabled"),
        50005 => Some("Cannot edit a message authored by another user"),
        50006 => Some("Cannot send an empty message"),
        50007 => Some("Cannot send messages to this user"),
        50008 => Some("Cannot send messages in a voice channel"),
        50013 => Some("Missing permissions"),
        50014 => Some("Invalid authentication token"),
        50016 => Some("Provided too few or too many messages to delete"),
        50025 => Some("Invalid OAuth2 access token"),
        50034 => Some("A message provided was too old to bulk delete"),
        50035 => Some("Invalid form body"),
        90001 => Some("Reaction blocked"),
        _ => None,
    }
}
