use serde::{Serialize, Deserialize, Serializer};
use std::fmt;

/// A wrapper for sensitive data (recipient phone, email, courier secrets)
/// that masks its value in Debug and Display output.
///
/// Serialization passes the real value through: API responses and courier
/// requests need it, log macros must not see it.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

const VISIBLE_TAIL: usize = 3;

impl<T: AsRef<str>> Masked<T> {
    /// Masked form that keeps the last few characters so operators can
    /// still tell two phone numbers apart in a log line.
    pub fn hint(&self) -> String {
        let raw = self.0.as_ref();
        let count = raw.chars().count();
        if count <= VISIBLE_TAIL * 2 {
            return "********".to_string();
        }
        let tail: String = raw.chars().skip(count - VISIBLE_TAIL).collect();
        format!("*****{}", tail)
    }
}

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Masked<T> {
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T: Default> Default for Masked<T> {
    fn default() -> Self {
        Self(T::default())
    }
}
