//! Product surfaces and their views.

use serde::{Deserialize, Serialize};

/// Which frontend the client is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    /// CPA practice management.
    #[default]
    Practice,
    /// Talent OS hiring.
    Talent,
}

/// Screen a chord shortcut navigates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    Dashboard,
    Clients,
    Invoices,
    Documents,
    Tasks,
    Messages,
    Candidates,
    Jobs,
    Interviews,
    Pipeline,
    Settings,
}
