//! Capsules, the messages sealed until their open date

use core::fmt;

use chrono::DateTime;
use chrono::Utc;
use url::Url;
use uuid::Uuid;

/// A time capsule
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capsule {
    /// Capsule ID, assigned by the store
    pub id: Uuid,

    /// The user that sealed the capsule, the only one allowed to see it
    pub owner_id: Uuid,

    /// Title, always visible to the owner
    pub title: String,

    /// Message, only visible once unlocked
    pub message: String,

    /// Moment the capsule unlocks
    pub open_date: DateTime<Utc>,

    /// Optional image, only visible once unlocked
    pub image_url: Option<String>,

    /// Creation date, assigned by the store
    pub created_at: DateTime<Utc>,

    /// Written as `false` on creation, not used for anything else
    pub opened: bool,
}

impl Capsule {
    /// Is the given user the owner of this capsule?
    pub fn is_owned_by(&self, user_id: &Uuid) -> bool {
        &self.owner_id == user_id
    }
}

/// Raw capsule input, as submitted by a user
#[derive(Clone, Debug, Default)]
pub struct CapsuleForm {
    /// Title
    pub title: String,

    /// Message
    pub message: String,

    /// Open date, missing when the user did not pick one
    pub open_date: Option<DateTime<Utc>>,

    /// Image URL, empty means no image
    pub image_url: Option<String>,
}

/// Validated fields of a capsule, ready to be written
///
/// Both create and update write all of these
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapsuleFields {
    /// Trimmed, non-empty title
    pub title: String,

    /// Trimmed, non-empty message
    pub message: String,

    /// Open date, in the future at validation time
    pub open_date: DateTime<Utc>,

    /// Parsed image URL
    pub image_url: Option<Url>,
}

/// Reasons a capsule form is rejected
#[derive(Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// Title is empty
    MissingTitle,

    /// Message is empty
    MissingMessage,

    /// No open date picked
    MissingOpenDate,

    /// Open date is now or in the past
    OpenDateNotInFuture,

    /// Image URL could not be parsed
    InvalidImageUrl(String),
}

impl std::error::Error for ValidationError {}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ValidationError::MissingTitle => write!(f, "Title is required"),
            ValidationError::MissingMessage => write!(f, "Message is required"),
            ValidationError::MissingOpenDate => write!(f, "Open date is required"),
            ValidationError::OpenDateNotInFuture => {
                write!(f, "Open date must be in the future")
            }
            ValidationError::InvalidImageUrl(err) => write!(f, "Invalid image URL: {err}"),
        }
    }
}

impl CapsuleForm {
    /// Validate the form against the current time
    ///
    /// Required fields are checked before the date, the date before the image URL
    pub fn validate(self, now: DateTime<Utc>) -> Result<CapsuleFields, ValidationError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ValidationError::MissingTitle);
        }

        let message = self.message.trim();
        if message.is_empty() {
            return Err(ValidationError::MissingMessage);
        }

        let open_date = self.open_date.ok_or(ValidationError::MissingOpenDate)?;
        if open_date <= now {
            return Err(ValidationError::OpenDateNotInFuture);
        }

        let image_url = match self.image_url.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(image_url) => Some(
                Url::parse(image_url)
                    .map_err(|err| ValidationError::InvalidImageUrl(err.to_string()))?,
            ),
        };

        Ok(CapsuleFields {
            title: title.to_string(),
            message: message.to_string(),
            open_date,
            image_url,
        })
    }
}
