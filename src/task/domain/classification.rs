//! Closed classification enumerations for tasks.

use super::ParseEnumError;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! storage_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Returns the canonical storage representation.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl TryFrom<&str> for $name {
            type Error = ParseEnumError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                let normalized = value.trim().to_ascii_lowercase();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|variant| variant.as_str() == normalized)
                    .ok_or_else(|| ParseEnumError::new($kind, value))
            }
        }
    };
}

storage_enum!(
    /// Kind of work a task node represents.
    TaskType, "task type" {
        /// Large body of work spanning several features.
        Epic => "epic",
        /// User-visible capability.
        Feature => "feature",
        /// Ordinary unit of work.
        Task => "task",
        /// Piece of a larger task.
        Subtask => "subtask",
        /// Defect fix.
        Bug => "bug",
        /// Investigation without a code deliverable.
        Research => "research",
        /// Review or approval step.
        Review => "review",
    }
);

storage_enum!(
    /// Specialist role a task is assigned to.
    SpecialistType, "specialist type" {
        /// Designs structure and interfaces.
        Architect => "architect",
        /// Gathers information and prior art.
        Researcher => "researcher",
        /// Writes the code.
        Implementer => "implementer",
        /// Verifies behaviour.
        Tester => "tester",
        /// Reviews finished work.
        Reviewer => "reviewer",
        /// Writes documentation.
        Documenter => "documenter",
        /// Coordinates other specialists.
        Coordinator => "coordinator",
    }
);

storage_enum!(
    /// Estimated difficulty of a task.
    Complexity, "complexity" {
        /// Minutes of work.
        Trivial => "trivial",
        /// Straightforward.
        Simple => "simple",
        /// Needs some design.
        Moderate => "moderate",
        /// Needs careful design.
        Complex => "complex",
        /// Should probably be split.
        VeryComplex => "very_complex",
    }
);
