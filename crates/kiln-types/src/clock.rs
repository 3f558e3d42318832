use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cid::Cid;

/// Opaque cursor over the change history.
///
/// A clock is the set of event heads the change feed had seen when it was
/// produced. Two equal clocks mean no change was missed between them. The
/// empty clock names the very beginning of the history.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clock(Vec<Cid>);

impl Clock {
    /// The clock positioned before any change.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn new(heads: Vec<Cid>) -> Self {
        Self(heads)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn heads(&self) -> &[Cid] {
        &self.0
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heads: Vec<String> = self.0.iter().map(Cid::short_hex).collect();
        write!(f, "[{}]", heads.join(","))
    }
}

impl From<Cid> for Clock {
    fn from(head: Cid) -> Self {
        Self(vec![head])
    }
}
