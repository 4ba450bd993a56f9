use serde::Serialize;

/// Boolean that also remembers whether it was set at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tristate {
    /// Not supplied by the client.
    #[default]
    Unset,
    /// Explicitly true.
    True,
    /// Explicitly false.
    False,
}

impl Tristate {
    /// Resolves against a server default when unset.
    #[must_use]
    pub const fn resolve(self, default: bool) -> bool {
        match self {
            Self::Unset => default,
            Self::True => true,
            Self::False => false,
        }
    }

    /// True when the client supplied a value.
    #[must_use]
    pub const fn is_set(self) -> bool {
        !matches!(self, Self::Unset)
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_falls_back_to_default() {
        assert!(Tristate::Unset.resolve(true));
        assert!(!Tristate::Unset.resolve(false));
        assert!(!Tristate::False.resolve(true));
        assert!(Tristate::from(true).is_set());
    }
}
