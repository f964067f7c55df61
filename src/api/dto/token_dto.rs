//! Request/response DTOs for the token endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{TokenAccount, TokenTransaction};

/// Body of `POST /users/{user_id}/tokens`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GrantRequest {
    /// Tokens to credit; must be positive.
    pub amount: i64,
    /// Administrator issuing the grant.
    pub admin_user_id: Option<i64>,
    /// Free-form note stored on the transaction.
    pub note: Option<String>,
}

/// Account state with its most recent transactions.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokensResponse {
    /// Current balance and lifetime usage.
    pub account: TokenAccount,
    /// Transactions in commit order.
    pub transactions: Vec<TokenTransaction>,
}
