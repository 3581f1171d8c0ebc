// ABOUTME: Signed callback token codec with per-user and group signing domains
// ABOUTME: Produces and verifies tamper-evident action tokens for inline keyboards
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

//! # Signed Token Codec
//!
//! Callback tokens ride through the chat transport and come back on button
//! presses; nothing about them can be trusted until their digest checks out.
//! A token is `payload:digest` where the digest is an HMAC-SHA256 over the
//! payload (truncated to 16 hex chars, the transport's 64-byte callback
//! budget leaves no room for more). Payloads may themselves contain `:`, so
//! verification always splits on the **last** separator.
//!
//! Two signing domains exist. The *user* domain mixes the acting user id
//! into the MAC input, so a token copied from someone else's keyboard fails
//! verification. The *group* domain signs the payload alone; it is for
//! buttons any chat member may legitimately press. Picking the wrong domain
//! is an authorization bug the codec cannot detect — the [`CallbackAction`]
//! variants hard-wire the correct domain per action so call sites cannot
//! choose at all.

use crate::constants::limits::SIGNATURE_LENGTH;
use ring::hmac;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::warn;

/// Separator between payload fields and between payload and digest
const SEPARATOR: char = ':';

/// Which authorization model a token is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningDomain {
    /// Only meaningful for the given user; anyone else's press must fail
    User(i64),
    /// Pressable by any member who can see the button
    Group,
}

/// Token decode failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CallbackError {
    /// Missing separator, empty payload, or unparsable fields
    #[error("malformed callback token")]
    Malformed,
    /// Digest did not match; treated as a security event
    #[error("callback token signature mismatch")]
    BadSignature,
    /// Structurally valid token for an action this build does not know
    #[error("unknown callback action")]
    UnknownAction,
}

/// HMAC signer over the process-wide secret. The key never leaves this
/// struct; payloads are not secret, only non-forgeable.
pub struct TokenSigner {
    key: hmac::Key,
}

impl TokenSigner {
    /// Build a signer from the configured secret
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
        }
    }

    /// Truncated hex digest over an exact message
    fn digest(&self, message: &str) -> String {
        let tag = hmac::sign(&self.key, message.as_bytes());
        let mut encoded = hex::encode(tag.as_ref());
        encoded.truncate(SIGNATURE_LENGTH);
        encoded
    }

    /// Digest for a payload in the given domain
    #[must_use]
    pub fn sign(&self, payload: &str, domain: SigningDomain) -> String {
        match domain {
            SigningDomain::User(user_id) => self.digest(&format!("{payload}{SEPARATOR}{user_id}")),
            SigningDomain::Group => self.digest(payload),
        }
    }

    /// Produce a full `payload:digest` token
    #[must_use]
    pub fn seal(&self, payload: &str, domain: SigningDomain) -> String {
        let sig = self.sign(payload, domain);
        format!("{payload}{SEPARATOR}{sig}")
    }

    /// Verify a full token and recover its payload.
    ///
    /// Splits on the last separator only, recomputes the digest for the
    /// recovered payload, and compares in constant time. Any parse failure
    /// is a verification failure, never a panic.
    pub fn open<'a>(&self, token: &'a str, domain: SigningDomain) -> Result<&'a str, CallbackError> {
        let (payload, received) = token.rsplit_once(SEPARATOR).ok_or(CallbackError::Malformed)?;
        if payload.is_empty() {
            return Err(CallbackError::Malformed);
        }

        let expected = self.sign(payload, domain);
        if expected.as_bytes().ct_eq(received.as_bytes()).into() {
            Ok(payload)
        } else {
            warn!(payload_len = payload.len(), "invalid callback token signature");
            Err(CallbackError::BadSignature)
        }
    }

    /// Boolean convenience wrapper around [`Self::open`]
    #[must_use]
    pub fn verify(&self, token: &str, domain: SigningDomain) -> bool {
        self.open(token, domain).is_ok()
    }
}

/// How far back a summary should reach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryWindow {
    /// Last N messages
    Messages(u32),
    /// Last N hours
    Hours(u32),
    /// Since local midnight
    Today,
}

impl SummaryWindow {
    /// Wire form: `"200"`, `"6h"`, `"today"`
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Messages(n) => n.to_string(),
            Self::Hours(n) => format!("{n}h"),
            Self::Today => "today".into(),
        }
    }

    /// Parse the wire form back
    pub fn decode(raw: &str) -> Result<Self, CallbackError> {
        if raw == "today" {
            return Ok(Self::Today);
        }
        if let Some(hours) = raw.strip_suffix('h') {
            return hours
                .parse()
                .map(Self::Hours)
                .map_err(|_| CallbackError::Malformed);
        }
        raw.parse()
            .map(Self::Messages)
            .map_err(|_| CallbackError::Malformed)
    }
}

/// The closed set of signed UI actions.
///
/// One variant per button kind, each with a fixed wire prefix and signing
/// domain. `encode` and `decode` are exact inverses over the original wire
/// format `prefix:fields...:digest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// Pick a personality for a group summary; any member may press
    SummaryPersonality {
        chat_id: i64,
        personality_id: i64,
        /// Message-count limit chosen earlier, if any
        limit: Option<u32>,
    },
    /// Pick a personality for a judge verdict; any member may press
    JudgePersonality { chat_id: i64, personality_id: i64 },
    /// Pick a personality for a DM summary; initiator only
    DmSummaryPersonality { chat_id: i64, personality_id: i64 },
    /// Pick the summary timeframe; initiator only
    SummaryTimeframe {
        chat_id: i64,
        personality_id: i64,
        window: SummaryWindow,
    },
    /// Return to the personality menu; initiator only
    BackToSummaryPersonality { chat_id: i64 },
    /// Choose a chat personality in a DM
    SelectPersonality { personality_id: i64 },
    /// Start a group chat session as the embedded initiator
    StartChat { personality_id: i64, user_id: i64 },
    /// End the group chat session started by the embedded initiator
    EndGroupChat { user_id: i64 },
    /// Open the personality setup flow
    SetupPersonality,
    /// Return to the main menu
    BackToMain,
}

impl CallbackAction {
    const PREFIX_SUMMARY_PERSONALITY: &'static str = "summary_personality";
    const PREFIX_JUDGE_PERSONALITY: &'static str = "judge_personality";
    const PREFIX_DM_SUMMARY_PERSONALITY: &'static str = "dm_summary_personality";
    const PREFIX_SUMMARY_TIMEFRAME: &'static str = "summary_timeframe";
    const PREFIX_BACK_TO_SUMMARY: &'static str = "back_to_summary_personality";
    const PREFIX_SELECT_PERSONALITY: &'static str = "sel_pers";
    const PREFIX_START_CHAT: &'static str = "start_chat";
    const PREFIX_END_GROUP_CHAT: &'static str = "end_group_chat";
    const PREFIX_SETUP_PERSONALITY: &'static str = "setup_personality";
    const PREFIX_BACK_TO_MAIN: &'static str = "back_to_main";

    /// The signing domain this action's authorization model requires.
    ///
    /// `viewer` is the user the token is being produced for or checked
    /// against; group-domain actions ignore it.
    #[must_use]
    pub const fn domain(&self, viewer: i64) -> SigningDomain {
        match self {
            Self::DmSummaryPersonality { .. }
            | Self::SummaryTimeframe { .. }
            | Self::BackToSummaryPersonality { .. } => SigningDomain::User(viewer),
            Self::SummaryPersonality { .. }
            | Self::JudgePersonality { .. }
            | Self::SelectPersonality { .. }
            | Self::StartChat { .. }
            | Self::EndGroupChat { .. }
            | Self::SetupPersonality
            | Self::BackToMain => SigningDomain::Group,
        }
    }

    /// Unsigned payload in the original wire layout
    fn payload(&self) -> String {
        match self {
            Self::SummaryPersonality {
                chat_id,
                personality_id,
                limit,
            } => {
                let limit = limit.map_or_else(|| "none".into(), |n| n.to_string());
                format!("{}:{chat_id}:{personality_id}:{limit}", Self::PREFIX_SUMMARY_PERSONALITY)
            }
            Self::JudgePersonality {
                chat_id,
                personality_id,
            } => format!("{}:{chat_id}:{personality_id}", Self::PREFIX_JUDGE_PERSONALITY),
            Self::DmSummaryPersonality {
                chat_id,
                personality_id,
            } => format!(
                "{}:{chat_id}:{personality_id}",
                Self::PREFIX_DM_SUMMARY_PERSONALITY
            ),
            Self::SummaryTimeframe {
                chat_id,
                personality_id,
                window,
            } => format!(
                "{}:{chat_id}:{personality_id}:{}",
                Self::PREFIX_SUMMARY_TIMEFRAME,
                window.encode()
            ),
            Self::BackToSummaryPersonality { chat_id } => {
                format!("{}:{chat_id}", Self::PREFIX_BACK_TO_SUMMARY)
            }
            Self::SelectPersonality { personality_id } => {
                format!("{}:{personality_id}", Self::PREFIX_SELECT_PERSONALITY)
            }
            Self::StartChat {
                personality_id,
                user_id,
            } => format!("{}:{personality_id}:{user_id}", Self::PREFIX_START_CHAT),
            Self::EndGroupChat { user_id } => {
                format!("{}:{user_id}", Self::PREFIX_END_GROUP_CHAT)
            }
            Self::SetupPersonality => Self::PREFIX_SETUP_PERSONALITY.into(),
            Self::BackToMain => Self::PREFIX_BACK_TO_MAIN.into(),
        }
    }

    /// Produce the signed wire token for this action
    #[must_use]
    pub fn encode(&self, signer: &TokenSigner, viewer: i64) -> String {
        signer.seal(&self.payload(), self.domain(viewer))
    }

    /// Verify and decode a wire token.
    ///
    /// The prefix is matched against the closed action set purely to select
    /// the signing domain; field values are only parsed after the digest has
    /// been verified. `viewer` is the pressing user, used for user-domain
    /// actions.
    pub fn decode(
        signer: &TokenSigner,
        token: &str,
        viewer: i64,
    ) -> Result<Self, CallbackError> {
        let (payload, _) = token.rsplit_once(SEPARATOR).ok_or(CallbackError::Malformed)?;
        let prefix = payload.split(SEPARATOR).next().ok_or(CallbackError::Malformed)?;

        let domain = match prefix {
            Self::PREFIX_DM_SUMMARY_PERSONALITY
            | Self::PREFIX_SUMMARY_TIMEFRAME
            | Self::PREFIX_BACK_TO_SUMMARY => SigningDomain::User(viewer),
            Self::PREFIX_SUMMARY_PERSONALITY
            | Self::PREFIX_JUDGE_PERSONALITY
            | Self::PREFIX_SELECT_PERSONALITY
            | Self::PREFIX_START_CHAT
            | Self::PREFIX_END_GROUP_CHAT
            | Self::PREFIX_SETUP_PERSONALITY
            | Self::PREFIX_BACK_TO_MAIN => SigningDomain::Group,
            _ => return Err(CallbackError::UnknownAction),
        };

        let payload = signer.open(token, domain)?;
        let fields: Vec<&str> = payload.split(SEPARATOR).skip(1).collect();

        match prefix {
            Self::PREFIX_SUMMARY_PERSONALITY => {
                let [chat, pers, limit] = fields[..] else {
                    return Err(CallbackError::Malformed);
                };
                Ok(Self::SummaryPersonality {
                    chat_id: parse_field(chat)?,
                    personality_id: parse_field(pers)?,
                    limit: if limit == "none" {
                        None
                    } else {
                        Some(parse_field(limit)?)
                    },
                })
            }
            Self::PREFIX_JUDGE_PERSONALITY => {
                let [chat, pers] = fields[..] else {
                    return Err(CallbackError::Malformed);
                };
                Ok(Self::JudgePersonality {
                    chat_id: parse_field(chat)?,
                    personality_id: parse_field(pers)?,
                })
            }
            Self::PREFIX_DM_SUMMARY_PERSONALITY => {
                let [chat, pers] = fields[..] else {
                    return Err(CallbackError::Malformed);
                };
                Ok(Self::DmSummaryPersonality {
                    chat_id: parse_field(chat)?,
                    personality_id: parse_field(pers)?,
                })
            }
            Self::PREFIX_SUMMARY_TIMEFRAME => {
                let [chat, pers, window] = fields[..] else {
                    return Err(CallbackError::Malformed);
                };
                Ok(Self::SummaryTimeframe {
                    chat_id: parse_field(chat)?,
                    personality_id: parse_field(pers)?,
                    window: SummaryWindow::decode(window)?,
                })
            }
            Self::PREFIX_BACK_TO_SUMMARY => {
                let [chat] = fields[..] else {
                    return Err(CallbackError::Malformed);
                };
                Ok(Self::BackToSummaryPersonality {
                    chat_id: parse_field(chat)?,
                })
            }
            Self::PREFIX_SELECT_PERSONALITY => {
                let [pers] = fields[..] else {
                    return Err(CallbackError::Malformed);
                };
                Ok(Self::SelectPersonality {
                    personality_id: parse_field(pers)?,
                })
            }
            Self::PREFIX_START_CHAT => {
                let [pers, user] = fields[..] else {
                    return Err(CallbackError::Malformed);
                };
                Ok(Self::StartChat {
                    personality_id: parse_field(pers)?,
                    user_id: parse_field(user)?,
                })
            }
            Self::PREFIX_END_GROUP_CHAT => {
                let [user] = fields[..] else {
                    return Err(CallbackError::Malformed);
                };
                Ok(Self::EndGroupChat {
                    user_id: parse_field(user)?,
                })
            }
            Self::PREFIX_SETUP_PERSONALITY => {
                if fields.is_empty() {
                    Ok(Self::SetupPersonality)
                } else {
                    Err(CallbackError::Malformed)
                }
            }
            Self::PREFIX_BACK_TO_MAIN => {
                if fields.is_empty() {
                    Ok(Self::BackToMain)
                } else {
                    Err(CallbackError::Malformed)
                }
            }
            _ => Err(CallbackError::UnknownAction),
        }
    }
}

fn parse_field<T: std::str::FromStr>(raw: &str) -> Result<T, CallbackError> {
    raw.parse().map_err(|_| CallbackError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new("unit-test-secret-0123456789abcdef")
    }

    #[test]
    fn seal_and_open_round_trip() {
        let s = signer();
        let token = s.seal("judge_personality:-100123:5", SigningDomain::Group);
        assert_eq!(
            s.open(&token, SigningDomain::Group).unwrap(),
            "judge_personality:-100123:5"
        );
    }

    #[test]
    fn payload_with_colons_splits_from_the_right() {
        let s = signer();
        let payload = "a:b:c:d:e";
        let token = s.seal(payload, SigningDomain::Group);
        assert_eq!(s.open(&token, SigningDomain::Group).unwrap(), payload);
    }

    #[test]
    fn user_domain_rejects_other_users() {
        let s = signer();
        let token = s.seal("dm_summary_personality:1:2", SigningDomain::User(42));
        assert!(s.verify(&token, SigningDomain::User(42)));
        assert!(!s.verify(&token, SigningDomain::User(43)));
    }

    #[test]
    fn missing_separator_is_a_verification_failure() {
        let s = signer();
        assert_eq!(
            s.open("nodelimiter", SigningDomain::Group),
            Err(CallbackError::Malformed)
        );
        assert_eq!(s.open("", SigningDomain::Group), Err(CallbackError::Malformed));
    }

    #[test]
    fn every_single_char_mutation_is_detected() {
        let s = signer();
        let token = s.seal("summary_timeframe:1:2:6h", SigningDomain::User(7));
        for i in 0..token.len() {
            let mut mutated: Vec<u8> = token.clone().into_bytes();
            mutated[i] = if mutated[i] == b'x' { b'y' } else { b'x' };
            let mutated = String::from_utf8(mutated).unwrap();
            if mutated == token {
                continue;
            }
            assert!(
                !s.verify(&mutated, SigningDomain::User(7)),
                "mutation at {i} accepted: {mutated}"
            );
        }
    }

    #[test]
    fn callback_actions_round_trip() {
        let s = signer();
        let actions = [
            CallbackAction::SummaryPersonality {
                chat_id: -1003243964395,
                personality_id: 5,
                limit: None,
            },
            CallbackAction::SummaryPersonality {
                chat_id: 1,
                personality_id: 2,
                limit: Some(200),
            },
            CallbackAction::JudgePersonality {
                chat_id: -5,
                personality_id: 9,
            },
            CallbackAction::DmSummaryPersonality {
                chat_id: 123,
                personality_id: 5,
            },
            CallbackAction::SummaryTimeframe {
                chat_id: 123,
                personality_id: 5,
                window: SummaryWindow::Hours(6),
            },
            CallbackAction::SummaryTimeframe {
                chat_id: 123,
                personality_id: 5,
                window: SummaryWindow::Today,
            },
            CallbackAction::BackToSummaryPersonality { chat_id: 123 },
            CallbackAction::SelectPersonality { personality_id: 3 },
            CallbackAction::StartChat {
                personality_id: 3,
                user_id: 456,
            },
            CallbackAction::EndGroupChat { user_id: 456 },
            CallbackAction::SetupPersonality,
            CallbackAction::BackToMain,
        ];

        for action in actions {
            let token = action.encode(&s, 456);
            let decoded = CallbackAction::decode(&s, &token, 456).unwrap();
            assert_eq!(decoded, action);
        }
    }

    #[test]
    fn user_domain_actions_fail_for_other_viewers() {
        let s = signer();
        let action = CallbackAction::DmSummaryPersonality {
            chat_id: 123,
            personality_id: 5,
        };
        let token = action.encode(&s, 42);
        assert_eq!(
            CallbackAction::decode(&s, &token, 999),
            Err(CallbackError::BadSignature)
        );
    }

    #[test]
    fn group_domain_actions_decode_for_any_viewer() {
        let s = signer();
        let action = CallbackAction::JudgePersonality {
            chat_id: -100,
            personality_id: 1,
        };
        let token = action.encode(&s, 42);
        assert!(CallbackAction::decode(&s, &token, 999).is_ok());
    }

    #[test]
    fn unknown_prefix_is_rejected_before_verification() {
        let s = signer();
        let token = s.seal("rm_rf_everything:1", SigningDomain::Group);
        assert_eq!(
            CallbackAction::decode(&s, &token, 1),
            Err(CallbackError::UnknownAction)
        );
    }

    #[test]
    fn summary_window_parses_all_forms() {
        assert_eq!(SummaryWindow::decode("500").unwrap(), SummaryWindow::Messages(500));
        assert_eq!(SummaryWindow::decode("12h").unwrap(), SummaryWindow::Hours(12));
        assert_eq!(SummaryWindow::decode("today").unwrap(), SummaryWindow::Today);
        assert!(SummaryWindow::decode("yesterday").is_err());
        assert!(SummaryWindow::decode("h").is_err());
    }
}
