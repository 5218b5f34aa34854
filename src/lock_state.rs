//! Lock state of capsules
//!
//! Lock state is never stored, it is derived from the open date and the moment of looking. What
//! may be shown follows from it: a locked capsule only shows its title and open date.

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::capsules::Capsule;

/// Lock state of a capsule at a given moment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockState {
    /// Open date not reached yet
    Locked,

    /// Open date reached, contents may be shown
    Unlocked,
}

/// Classify a capsule at `now`
///
/// Unlocked exactly from the open date onwards, never locked again after that
pub fn classify(capsule: &Capsule, now: DateTime<Utc>) -> LockState {
    if now >= capsule.open_date {
        LockState::Unlocked
    } else {
        LockState::Locked
    }
}

/// The fields of a capsule that may be shown
///
/// The locked variant has no room for the message or image
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DisplayFields {
    /// Fields of a locked capsule
    #[serde(rename_all = "camelCase")]
    Locked {
        title: String,
        open_date: DateTime<Utc>,
        open_date_display: String,
    },

    /// Fields of an unlocked capsule
    #[serde(rename_all = "camelCase")]
    Unlocked {
        title: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        open_date: DateTime<Utc>,
        open_date_display: String,
    },
}

/// A classified capsule, ready to be rendered
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CapsuleView {
    /// Capsule ID
    pub id: Uuid,

    /// Lock state at the moment of classification
    pub state: LockState,

    /// What may be shown
    #[serde(flatten)]
    pub fields: DisplayFields,
}

/// Classify a capsule and keep only what may be shown
pub fn reveal(capsule: &Capsule, now: DateTime<Utc>) -> CapsuleView {
    let state = classify(capsule, now);

    let fields = match state {
        LockState::Locked => DisplayFields::Locked {
            title: capsule.title.clone(),
            open_date: capsule.open_date,
            open_date_display: format_open_date(capsule.open_date),
        },
        LockState::Unlocked => DisplayFields::Unlocked {
            title: capsule.title.clone(),
            message: capsule.message.clone(),
            image_url: capsule.image_url.clone(),
            open_date: capsule.open_date,
            open_date_display: format_open_date(capsule.open_date),
        },
    };

    CapsuleView {
        id: capsule.id,
        state,
        fields,
    }
}

/// Human friendly open date, like `October 19, 2026, 03:04 PM` (UTC)
pub fn format_open_date(open_date: DateTime<Utc>) -> String {
    open_date.format("%B %-d, %Y, %I:%M %p").to_string()
}
