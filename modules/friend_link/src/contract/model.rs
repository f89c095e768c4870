use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use url::Url;
use uuid::Uuid;

// ----- identifiers -----------------------------------------------------------

/// Opaque per-account identifier of a person in one account's local graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberKey(pub Uuid);

impl MemberKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemberKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a real account in the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ----- accounts --------------------------------------------------------------

/// A real account as known to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAccount {
    pub id: AccountId,
    pub email: String,
    pub display_name: String,
}

/// The signed-in owner's own identity inside their local graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfIdentity {
    pub account: SessionAccount,
    /// Member key the owner uses for themselves in groups and expenses.
    pub member_key: MemberKey,
    /// Name of that member entry.
    pub member_name: String,
    /// Other member keys known to represent the owner (e.g. adopted by linking).
    pub equivalent_member_keys: BTreeSet<MemberKey>,
}

impl SelfIdentity {
    pub fn new(account: SessionAccount, member_key: MemberKey, member_name: impl Into<String>) -> Self {
        Self {
            account,
            member_key,
            member_name: member_name.into(),
            equivalent_member_keys: BTreeSet::new(),
        }
    }

    /// Whether `key` represents the owner.
    pub fn is_me(&self, key: MemberKey) -> bool {
        key == self.member_key || self.equivalent_member_keys.contains(&key)
    }

    /// Record that `key` now also represents the owner.
    pub fn merge_equivalent(&mut self, key: MemberKey) {
        if key != self.member_key {
            self.equivalent_member_keys.insert(key);
        }
    }

    pub fn linked_account(&self) -> LinkedAccount {
        LinkedAccount::full(self.account.id, self.account.email.clone())
    }
}

// ----- link state ------------------------------------------------------------

/// The real account a member key is linked to. At least one of id/email is
/// always present; the constructor enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkedAccount {
    id: Option<AccountId>,
    email: Option<String>,
}

impl LinkedAccount {
    /// Returns `None` when neither an id nor a non-blank email is given.
    pub fn new(id: Option<AccountId>, email: Option<String>) -> Option<Self> {
        let email = email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());
        if id.is_none() && email.is_none() {
            return None;
        }
        Some(Self { id, email })
    }

    pub fn full(id: AccountId, email: impl Into<String>) -> Self {
        let email = email.into().trim().to_string();
        Self {
            id: Some(id),
            email: (!email.is_empty()).then_some(email),
        }
    }

    pub fn id(&self) -> Option<AccountId> {
        self.id
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Same account by id, or by case-insensitive email when ids are missing.
    pub fn is_account(&self, id: Option<AccountId>, email: Option<&str>) -> bool {
        if let (Some(mine), Some(theirs)) = (self.id, id) {
            return mine == theirs;
        }
        match (self.email.as_deref(), email) {
            (Some(mine), Some(theirs)) => mine.trim().eq_ignore_ascii_case(theirs.trim()),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Unlinked,
    Linked(LinkedAccount),
}

impl LinkState {
    pub fn is_linked(&self) -> bool {
        matches!(self, LinkState::Linked(_))
    }

    pub fn account(&self) -> Option<&LinkedAccount> {
        match self {
            LinkState::Linked(acc) => Some(acc),
            LinkState::Unlinked => None,
        }
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.account().and_then(LinkedAccount::id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendStatus {
    Friend,
    Pending,
    Rejected,
}

// ----- friends ---------------------------------------------------------------

/// One friend entry of the owning account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountFriend {
    pub member_key: MemberKey,
    pub name: String,
    pub nickname: Option<String>,
    pub original_name: Option<String>,
    pub link: LinkState,
    aliases: BTreeSet<MemberKey>,
    pub status: Option<FriendStatus>,
    pub updated_at: DateTime<Utc>,
}

impl AccountFriend {
    pub fn new(member_key: MemberKey, name: impl Into<String>) -> Self {
        Self {
            member_key,
            name: name.into(),
            nickname: None,
            original_name: None,
            link: LinkState::Unlinked,
            aliases: BTreeSet::new(),
            status: None,
            updated_at: Utc::now(),
        }
    }

    pub fn linked_to(mut self, account: LinkedAccount) -> Self {
        self.link = LinkState::Linked(account);
        self
    }

    pub fn with_status(mut self, status: FriendStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    pub fn with_aliases(mut self, aliases: impl IntoIterator<Item = MemberKey>) -> Self {
        for alias in aliases {
            self.add_alias(alias);
        }
        self
    }

    pub fn updated(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = at;
        self
    }

    /// Declared aliases; never contains the record's own key.
    pub fn aliases(&self) -> &BTreeSet<MemberKey> {
        &self.aliases
    }

    /// Adds an alias; the record's own key is ignored.
    pub fn add_alias(&mut self, alias: MemberKey) -> bool {
        alias != self.member_key && self.aliases.insert(alias)
    }

    pub fn replace_aliases(&mut self, aliases: impl IntoIterator<Item = MemberKey>) {
        self.aliases.clear();
        for alias in aliases {
            self.add_alias(alias);
        }
    }

    /// Own key or one of the declared aliases.
    pub fn answers_to(&self, key: MemberKey) -> bool {
        self.member_key == key || self.aliases.contains(&key)
    }

    /// Name shown to the owner: nickname when chosen, otherwise the name.
    pub fn display_name(&self) -> &str {
        self.nickname
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.name)
    }
}

/// Flat friend shape used by the remote store and on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRecord {
    pub member_id: MemberKey,
    pub name: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub has_linked_account: bool,
    #[serde(default)]
    pub linked_account_id: Option<AccountId>,
    #[serde(default)]
    pub linked_account_email: Option<String>,
    #[serde(default)]
    pub alias_member_ids: Vec<MemberKey>,
    #[serde(default)]
    pub status: Option<FriendStatus>,
    pub updated_at: DateTime<Utc>,
}

impl From<&AccountFriend> for FriendRecord {
    fn from(f: &AccountFriend) -> Self {
        let account = f.link.account();
        Self {
            member_id: f.member_key,
            name: f.name.clone(),
            nickname: f.nickname.clone(),
            original_name: f.original_name.clone(),
            has_linked_account: account.is_some(),
            linked_account_id: account.and_then(LinkedAccount::id),
            linked_account_email: account.and_then(|a| a.email().map(str::to_string)),
            alias_member_ids: f.aliases.iter().copied().collect(),
            status: f.status,
            updated_at: f.updated_at,
        }
    }
}

impl From<FriendRecord> for AccountFriend {
    /// A record flagged as linked without id or email is read as unlinked.
    fn from(r: FriendRecord) -> Self {
        let link = if r.has_linked_account {
            LinkedAccount::new(r.linked_account_id, r.linked_account_email)
                .map(LinkState::Linked)
                .unwrap_or_default()
        } else {
            LinkState::Unlinked
        };
        let mut friend = AccountFriend {
            member_key: r.member_id,
            name: r.name,
            nickname: r.nickname,
            original_name: r.original_name,
            link,
            aliases: BTreeSet::new(),
            status: r.status,
            updated_at: r.updated_at,
        };
        friend.replace_aliases(r.alias_member_ids);
        friend
    }
}

// ----- link requests ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkRequestStatus {
    Pending,
    Accepted,
    Declined,
    Rejected,
    Expired,
    Cancelled,
}

impl LinkRequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, LinkRequestStatus::Pending)
    }
}

impl fmt::Display for LinkRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkRequestStatus::Pending => "pending",
            LinkRequestStatus::Accepted => "accepted",
            LinkRequestStatus::Declined => "declined",
            LinkRequestStatus::Rejected => "rejected",
            LinkRequestStatus::Expired => "expired",
            LinkRequestStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Explicit invitation to link the recipient's account to a member key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    pub id: Uuid,
    pub requester_id: AccountId,
    pub requester_email: String,
    pub requester_name: String,
    pub recipient_email: String,
    pub target_member_key: MemberKey,
    pub target_member_name: String,
    pub status: LinkRequestStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub rejected_at: Option<DateTime<Utc>>,
}

impl LinkRequest {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Stored status, with elapsed pending requests reported as expired.
    pub fn status_at(&self, now: DateTime<Utc>) -> LinkRequestStatus {
        match self.status {
            LinkRequestStatus::Pending if self.is_expired_at(now) => LinkRequestStatus::Expired,
            s => s,
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == LinkRequestStatus::Pending
    }
}

// ----- invite tokens ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteStatus {
    Active,
    Claimed,
    Revoked,
    Expired,
}

/// Bearer invitation claimable by whoever presents its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteToken {
    pub id: Uuid,
    pub creator_id: AccountId,
    pub creator_email: String,
    pub creator_name: String,
    /// Member key the creator uses for themselves; drives the balance preview.
    pub creator_member_key: MemberKey,
    pub target_member_key: MemberKey,
    pub target_member_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub claimed_by: Option<AccountId>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl InviteToken {
    pub fn status_at(&self, now: DateTime<Utc>) -> InviteStatus {
        if self.revoked_at.is_some() {
            InviteStatus::Revoked
        } else if self.claimed_by.is_some() {
            InviteStatus::Claimed
        } else if now >= self.expires_at {
            InviteStatus::Expired
        } else {
            InviteStatus::Active
        }
    }
}

/// A freshly generated token with its shareable locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedInvite {
    pub token: InviteToken,
    pub url: Url,
    pub share_text: String,
}

/// Unsettled expenses of the token creator that involve the target member.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExpensePreview {
    pub direct_expenses: Vec<Expense>,
    pub group_expenses: Vec<Expense>,
    /// Positive: the target member owes the creator.
    pub balance: Decimal,
    pub group_names: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteValidation {
    pub is_valid: bool,
    pub token: Option<InviteToken>,
    pub preview: Option<ExpensePreview>,
    pub error: Option<String>,
}

impl InviteValidation {
    pub fn valid(token: InviteToken, preview: ExpensePreview) -> Self {
        Self {
            is_valid: true,
            token: Some(token),
            preview: Some(preview),
            error: None,
        }
    }

    pub fn invalid(token: Option<InviteToken>, error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            token,
            preview: None,
            error: Some(error.into()),
        }
    }
}

// ----- link results & failures -----------------------------------------------

/// Terminal success of both link protocols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkAcceptResult {
    /// Member key that now represents the accepting account.
    pub member_key: MemberKey,
    pub linked_account_id: AccountId,
    pub linked_account_email: String,
}

/// A post-link propagation that did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// Owner's friend entry for the counterpart account.
    pub member_key: MemberKey,
    pub linked_account_id: AccountId,
    pub linked_account_email: String,
    /// Member key that now represents the owner in the counterpart's graph.
    pub represented_member_key: MemberKey,
    pub reason: String,
    pub retry_count: u32,
    pub recorded_at: DateTime<Utc>,
}

// ----- groups & expenses -----------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub member_key: MemberKey,
    pub name: String,
    #[serde(default)]
    pub account_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub owner_email: String,
    pub members: Vec<GroupMember>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn has_member(&self, key: MemberKey) -> bool {
        self.members.iter().any(|m| m.member_key == key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseSplit {
    pub member_key: MemberKey,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: Uuid,
    pub owner_email: String,
    #[serde(default)]
    pub group_id: Option<Uuid>,
    pub description: String,
    pub amount: Decimal,
    pub paid_by: MemberKey,
    pub splits: Vec<ExpenseSplit>,
    #[serde(default)]
    pub settled: bool,
    pub date: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    pub fn involves(&self, key: MemberKey) -> bool {
        self.paid_by == key || self.splits.iter().any(|s| s.member_key == key)
    }

    pub fn share_of(&self, key: MemberKey) -> Decimal {
        self.splits
            .iter()
            .filter(|s| s.member_key == key)
            .map(|s| s.amount)
            .sum()
    }
}
