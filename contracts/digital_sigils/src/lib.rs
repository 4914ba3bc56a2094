#![cfg_attr(not(feature = "std"), no_std, no_main)]

pub mod affinity;
pub mod fees;

/// # Digital Sigils — Token Ledger & Distribution Engine
///
/// **Role:** Ground-truth ledger for non-fungible Sigils that bank a fungible
/// "charge" (a claim backed by the companion coin ledger) and an intrinsic
/// native-currency "value", pass through a charge → activate → discharge →
/// destroy lifecycle, and redistribute charge/value through a directed,
/// efficiency-weighted link graph.
///
/// ## Lifecycle
///
/// ```text
///   Inactive ──charge*──► charge ≥ threshold
///      │                       │
///      │                  activate (batched, resumable)
///      │                       ▼
///      │                    Active ──charge──► link fanout / active_charge
///      │                       │
///      ├──discharge──┐    deactivate
///      ▼             ▼         ▼
///   (returns      Inactive ◄───┘
///    contributions;
///    burn=true ⇒ Destroyed)
/// ```
///
/// Activation and discharge walk the contributor list in bounded slices and
/// persist a cursor between calls, so no operation ever iterates an unbounded
/// list. While a cursor is nonzero, ordinary charging is rejected; charge
/// arriving through a link instead degrades silently to local accrual so a
/// fanout never hard-fails on a busy node.
///
/// ## Accounting
///
/// `sum(contributions[*].charge) == token.charge + token.distribution_charge`
/// outside an in-flight batch step. The distribution pass freezes the epoch
/// (`charge → distribution_charge`, `value → distribution_value`) before
/// draining, so charge arriving between batch calls is never double counted.
///
/// ## External collaborators
///
/// The fungible coin ledger is consumed through [`CoinLedger`] via
/// cross-contract calls. When no ledger address is configured the calls are
/// mocked as successful, which keeps the core unit-testable off-chain.
#[ink::contract]
mod digital_sigils {
    use crate::{affinity, fees};
    use ink::env::call::{build_call, ExecutionInput, Selector};
    use ink::env::DefaultEnvironment;
    use ink::prelude::vec::Vec;
    use ink::storage::Mapping;

    pub type TokenId = u64;

    // =========================================================================
    // CONSTANTS
    // =========================================================================

    /// Default efficiency of the plane link added at creation (100%).
    pub const DEFAULT_LINK_EFFICIENCY: u8 = 100;

    /// One full bonus interval for the withdrawal coin bonus (24 h in ms).
    pub const BONUS_INTERVAL_MS: Timestamp = 86_400_000;

    /// Inactivity window after which a sigil becomes rescuable (90 days in ms).
    pub const INACTIVITY_PERIOD_MS: Timestamp = 7_776_000_000;

    // =========================================================================
    // STORED TYPES
    // =========================================================================

    /// Per-sigil aggregate: charge/value pools, batch cursors, link list,
    /// lifecycle flags.
    #[derive(Debug, Clone, PartialEq, Eq, Default, scale::Encode, scale::Decode)]
    #[cfg_attr(
        feature = "std",
        derive(scale_info::TypeInfo, ink::storage::traits::StorageLayout)
    )]
    pub struct Token {
        /// Coin claim banked toward activation, not yet frozen into a batch.
        pub charge: Balance,
        /// Charge frozen at the start of a distribution pass. Ratchets up
        /// until the pass completes, then resets to zero.
        pub distribution_charge: Balance,
        /// Charge accumulated after activation; bypasses the distribution
        /// pipeline and feeds the link graph.
        pub active_charge: Balance,
        /// Native value not yet frozen into a batch.
        pub value: Balance,
        /// Value frozen analogously to `distribution_charge`; drained by
        /// per-contributor shares as the pass progresses.
        pub distribution_value: Balance,
        /// Per-coin value rate of the in-flight pass, fixed when the pass
        /// starts so resumed batches pay out identically to a single pass.
        pub distribution_rate: Balance,
        /// Native price per `coin_scale` units of coin when charging.
        /// Zero is legal (free charging).
        pub incremental_value: Balance,
        /// Charge required before activation is permitted.
        pub activation_threshold: Balance,
        /// Cursor of the discharge clear sub-phase. Zero = not in progress.
        pub discharge_index: u32,
        /// Cursor of the distribution walk (both modes). Zero = not in progress.
        pub distribution_index: u32,
        /// Length of the contributor list.
        pub contributor_count: u32,
        /// Outbound links, insertion order = priority order. At most
        /// [`fees::MAX_LINKS`] entries.
        pub links: Vec<TokenId>,
        /// Immutable blob set at creation; leading bytes encode the category
        /// affinity codes (see [`crate::affinity`]).
        pub data: Vec<u8>,
        /// Cross-reference to a wrapped external asset. Zero = none.
        pub external_ref: u64,
        /// Timestamp of the last owner-visible mutation.
        pub last_activity: Timestamp,
        pub active: bool,
        pub activating: bool,
        pub discharging: bool,
        pub restricted: bool,
        /// Set once a batch pass has seen the wrapped-asset row; the external
        /// asset may then be recalled.
        pub recallable: bool,
    }

    /// Per-(sigil, address) contribution record.
    #[derive(Debug, Clone, PartialEq, Eq, Default, scale::Encode, scale::Decode)]
    #[cfg_attr(
        feature = "std",
        derive(scale_info::TypeInfo, ink::storage::traits::StorageLayout)
    )]
    pub struct Contribution {
        pub charge: Balance,
        pub value: Balance,
        /// True while the address occupies a contributor-list slot.
        pub exists: bool,
        /// True once this entry has been processed in the current batch epoch.
        pub distributed: bool,
        /// Sticky: once set it never reverts, surviving discharge resets.
        pub whitelisted: bool,
    }

    /// Outbound link weighting.
    #[derive(Debug, Clone, PartialEq, Eq, Default, scale::Encode, scale::Decode)]
    #[cfg_attr(
        feature = "std",
        derive(scale_info::TypeInfo, ink::storage::traits::StorageLayout)
    )]
    pub struct LinkEfficiency {
        /// Base efficiency percentage (can exceed 100).
        pub base: u8,
        /// Additive percentage from the category-affinity table.
        pub affinity_bonus: u128,
    }

    /// Per-address pending payout awaiting withdrawal.
    #[derive(Debug, Clone, PartialEq, Eq, Default, scale::Encode, scale::Decode)]
    #[cfg_attr(
        feature = "std",
        derive(scale_info::TypeInfo, ink::storage::traits::StorageLayout)
    )]
    pub struct Distribution {
        /// Timestamp from which the next bonus interval is measured. Updated
        /// only when bonus eligibility is evaluated.
        pub time: Timestamp,
        pub coins: Balance,
        pub value: Balance,
    }

    // =========================================================================
    // STORAGE
    // =========================================================================

    #[ink(storage)]
    pub struct DigitalSigils {
        /// Deployer / admin.
        owner: AccountId,

        /// Companion fungible coin ledger. `None` mocks every coin call as
        /// successful (devnet / off-chain testing).
        coin_ledger: Option<AccountId>,

        // ── Token ledger ──────────────────────────────────────────────────
        tokens: Mapping<TokenId, Token>,
        token_owner: Mapping<TokenId, AccountId>,
        owned_count: Mapping<AccountId, u32>,
        next_token_id: TokenId,

        // ── Contribution ledger ───────────────────────────────────────────
        /// Append-only contributor list per sigil, keyed by slot index.
        contributors: Mapping<(TokenId, u32), AccountId>,
        contributions: Mapping<(TokenId, AccountId), Contribution>,

        // ── Link graph ────────────────────────────────────────────────────
        link_efficiency: Mapping<(TokenId, TokenId), LinkEfficiency>,

        // ── Distribution ledger ───────────────────────────────────────────
        distributions: Mapping<AccountId, Distribution>,

        // ── External asset registry ───────────────────────────────────────
        external_tokens: Mapping<u64, TokenId>,

        // ── Participation control ─────────────────────────────────────────
        blacklist: Mapping<AccountId, bool>,
        opted_out: Mapping<AccountId, bool>,

        // ── Configuration ─────────────────────────────────────────────────
        /// Fixed-point unit of the companion coin.
        coin_scale: Balance,
        /// Base coin fee unit; also the cap on the withdrawal bonus.
        coin_rate: Balance,
        /// Global native price floor per coin unit.
        incremental_value: Balance,
        /// Global minimum funding payment (deactivate, discharge, opt-out,
        /// restricted creation, bonus donation threshold).
        transfer_value: Balance,
        /// Contributors processed per discharge slice (activation processes
        /// twice this many).
        batch_size: u32,
        /// Number of seeded plane sigils.
        plane_count: u32,

        // ── Contract-wide pool ────────────────────────────────────────────
        /// Fees and unclaimed leftovers swept to the contract.
        pooled_value: Balance,

        // ── Safety ────────────────────────────────────────────────────────
        paused: bool,

        /// Forces the coin-ledger bridge to report payout failure, so the
        /// recoverable withdrawal path is reachable off-chain.
        #[cfg(test)]
        coin_transfers_fail: bool,
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    #[ink(event)]
    pub struct TokenCreated {
        #[ink(topic)]
        token_id: TokenId,
        #[ink(topic)]
        owner: AccountId,
        plane: u32,
    }

    #[ink(event)]
    pub struct TokenRestricted {
        #[ink(topic)]
        token_id: TokenId,
    }

    #[ink(event)]
    pub struct TokenUpdated {
        #[ink(topic)]
        token_id: TokenId,
        incremental_value: Balance,
        activation_threshold: Balance,
    }

    #[ink(event)]
    pub struct TokenCharged {
        #[ink(topic)]
        token_id: TokenId,
        #[ink(topic)]
        contributor: AccountId,
        coins: Balance,
        value: Balance,
    }

    /// Charge routed through the active-charge path (post-activation).
    #[ink(event)]
    pub struct ActiveCharge {
        #[ink(topic)]
        token_id: TokenId,
        coins: Balance,
        value: Balance,
    }

    /// `complete = false` means the batch suspended and the caller must call
    /// again to continue from the stored cursor.
    #[ink(event)]
    pub struct TokenActivated {
        #[ink(topic)]
        token_id: TokenId,
        complete: bool,
    }

    #[ink(event)]
    pub struct TokenDeactivated {
        #[ink(topic)]
        token_id: TokenId,
    }

    #[ink(event)]
    pub struct TokenDischarged {
        #[ink(topic)]
        token_id: TokenId,
        complete: bool,
    }

    #[ink(event)]
    pub struct TokenDestroyed {
        #[ink(topic)]
        token_id: TokenId,
    }

    #[ink(event)]
    pub struct TokenLinked {
        #[ink(topic)]
        token_id: TokenId,
        #[ink(topic)]
        link_id: TokenId,
        efficiency: u8,
        affinity_bonus: u128,
    }

    #[ink(event)]
    pub struct TokenUnlinked {
        #[ink(topic)]
        token_id: TokenId,
        #[ink(topic)]
        link_id: TokenId,
    }

    #[ink(event)]
    pub struct ContributionRecorded {
        #[ink(topic)]
        token_id: TokenId,
        #[ink(topic)]
        contributor: AccountId,
        charge: Balance,
        value: Balance,
    }

    /// Value-only contribution (funding, link payment split, creation value).
    #[ink(event)]
    pub struct ValueContributed {
        #[ink(topic)]
        token_id: TokenId,
        #[ink(topic)]
        contributor: AccountId,
        value: Balance,
    }

    /// Pending payout credited to the distribution ledger.
    #[ink(event)]
    pub struct PendingDistribution {
        #[ink(topic)]
        account: AccountId,
        value: Balance,
        coins: Balance,
    }

    /// Leftover value swept into the contract-wide pool.
    #[ink(event)]
    pub struct ValuePooled {
        amount: Balance,
    }

    /// `coins` is the amount actually delivered this call; a failed coin
    /// transfer re-credits the pending balance and reports zero.
    #[ink(event)]
    pub struct Withdrawal {
        #[ink(topic)]
        account: AccountId,
        value: Balance,
        coins: Balance,
    }

    #[ink(event)]
    pub struct Whitelisted {
        #[ink(topic)]
        token_id: TokenId,
        #[ink(topic)]
        account: AccountId,
    }

    #[ink(event)]
    pub struct TokenTransferred {
        #[ink(topic)]
        token_id: TokenId,
        #[ink(topic)]
        from: AccountId,
        #[ink(topic)]
        to: AccountId,
    }

    #[ink(event)]
    pub struct ExternalAssetWrapped {
        #[ink(topic)]
        external_id: u64,
        #[ink(topic)]
        token_id: TokenId,
        depositor: AccountId,
    }

    #[ink(event)]
    pub struct ExternalAssetRecalled {
        #[ink(topic)]
        external_id: u64,
        #[ink(topic)]
        token_id: TokenId,
    }

    #[ink(event)]
    pub struct TokenRescued {
        #[ink(topic)]
        token_id: TokenId,
        #[ink(topic)]
        to: AccountId,
    }

    #[ink(event)]
    pub struct ConfigUpdated {
        coin_rate: Balance,
        incremental_value: Balance,
        transfer_value: Balance,
        batch_size: u32,
    }

    #[ink(event)]
    pub struct PausedSet {
        paused: bool,
    }

    #[ink(event)]
    pub struct BlacklistUpdated {
        #[ink(topic)]
        account: AccountId,
        blacklisted: bool,
    }

    // =========================================================================
    // ERRORS
    // =========================================================================

    #[derive(Debug, PartialEq, Eq, scale::Encode, scale::Decode)]
    #[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
    pub enum Error {
        /// Caller is not the contract owner.
        NotOwner,
        /// Caller does not own the targeted sigil.
        NotTokenOwner,
        /// No sigil exists under this id.
        TokenNotFound,
        /// Attached value is below the computed minimum (carried).
        InsufficientFunds(Balance),
        /// The external coin ledger rejected a transfer of this amount.
        CoinTransferFailed(Balance),
        /// The sigil is restricted and the caller is not whitelisted.
        Restricted,
        /// A discharge/distribution cursor is active on this sigil.
        BatchOperationInProgress,
        /// Activation preconditions not met (already active, discharging, or
        /// below threshold).
        TokenCannotBeActivated,
        /// Deactivation preconditions not met (inactive or pending charge).
        TokenCannotBeDeactivated,
        /// Nothing to discharge: no charge, no value, no batch in progress.
        NothingToDischarge,
        /// A resumable activation pass is in progress.
        ActivationInProgress,
        /// Self-link, unknown destination, or non-monotonic efficiency.
        InvalidLink,
        /// The outbound adjacency list is full.
        TooManyLinks,
        /// Unknown, duplicate, or zero external asset reference.
        InvalidExternalAsset,
        /// The wrapped asset has not cleared a full discharge cycle yet.
        NotRecallable,
        /// The holder is neither blacklisted nor inactive long enough.
        RescueNotEligible,
        /// The account is blacklisted or has opted out.
        Blacklisted,
        /// Contract is paused.
        ContractPaused,
        /// Rejected by `configure` validation.
        InvalidConfiguration,
        /// A native value transfer failed.
        TransferFailed,
        /// An arithmetic operation overflowed.
        Overflow,
    }

    // =========================================================================
    // CROSS-CONTRACT INTERFACES
    // =========================================================================

    /// The companion fungible coin ledger (standard transferable balance with
    /// allowance semantics). A failed `transfer_from` is a hard failure for
    /// direct charges; a failed `transfer` on withdrawal is recoverable.
    #[ink::trait_definition]
    pub trait CoinLedger {
        #[ink(message)]
        fn transfer(&mut self, to: AccountId, amount: Balance) -> bool;

        #[ink(message)]
        fn transfer_from(&mut self, from: AccountId, to: AccountId, amount: Balance) -> bool;

        #[ink(message)]
        fn approve(&mut self, spender: AccountId, amount: Balance) -> bool;

        #[ink(message)]
        fn balance_of(&self, account: AccountId) -> Balance;
    }

    // =========================================================================
    // IMPLEMENTATION
    // =========================================================================

    impl DigitalSigils {
        // ---------------------------------------------------------------------
        // Constructor
        // ---------------------------------------------------------------------

        /// Deploy the ledger and seed `plane_count` plane sigils (ids
        /// `1..=plane_count`), which start active and serve as default link
        /// targets at creation time.
        #[ink(constructor)]
        pub fn new(
            coin_ledger: Option<AccountId>,
            coin_scale: Balance,
            coin_rate: Balance,
            incremental_value: Balance,
            transfer_value: Balance,
            batch_size: u32,
            plane_count: u32,
        ) -> Self {
            let caller = Self::env().caller();
            let now = Self::env().block_timestamp();
            let plane_count = plane_count.min(fees::PLANE_COUNT_MAX);

            let mut instance = Self {
                owner: caller,
                coin_ledger,
                tokens: Mapping::default(),
                token_owner: Mapping::default(),
                owned_count: Mapping::default(),
                next_token_id: 1,
                contributors: Mapping::default(),
                contributions: Mapping::default(),
                link_efficiency: Mapping::default(),
                distributions: Mapping::default(),
                external_tokens: Mapping::default(),
                blacklist: Mapping::default(),
                opted_out: Mapping::default(),
                coin_scale: coin_scale.max(1),
                coin_rate,
                incremental_value,
                transfer_value,
                batch_size: batch_size.max(1),
                plane_count,
                pooled_value: 0,
                paused: false,
                #[cfg(test)]
                coin_transfers_fail: false,
            };

            for plane in 1..=plane_count {
                let id = instance.next_token_id;
                instance.next_token_id += 1;
                let mut data = Vec::new();
                data.push(Self::plane_category(plane));
                let token = Token {
                    active: true,
                    data,
                    last_activity: now,
                    ..Token::default()
                };
                instance.tokens.insert(id, &token);
                instance.token_owner.insert(id, &caller);
                Self::env().emit_event(TokenCreated {
                    token_id: id,
                    owner: caller,
                    plane,
                });
            }
            instance.owned_count.insert(caller, &plane_count);

            instance
        }

        /// Category byte assigned to each seeded plane. The last plane is the
        /// terminal category.
        fn plane_category(plane: u32) -> u8 {
            if plane == fees::PLANE_COUNT_MAX {
                affinity::TERMINAL_CATEGORY
            } else {
                (0x10 * plane) as u8
            }
        }

        // =====================================================================
        // CREATION
        // =====================================================================

        /// Create a sigil. Attached value becomes the sigil's initial value
        /// and is recorded as a value-only contribution by the creator.
        ///
        /// Restricted creation requires payment of at least
        /// `max(incremental_value, transfer_value)`. A nonzero `plane` adds a
        /// default 100%-efficiency link against that plane and debits the
        /// plane-tier coin fee from the creator.
        #[ink(message, payable)]
        pub fn create_token(
            &mut self,
            incremental_value: Balance,
            activation_threshold: Balance,
            restricted: bool,
            plane: u32,
            data: Vec<u8>,
        ) -> Result<TokenId, Error> {
            self.assert_not_paused()?;
            let caller = self.env().caller();
            self.assert_participant(caller)?;
            let sent = self.env().transferred_value();
            let now = self.env().block_timestamp();

            if restricted {
                let required = incremental_value.max(self.transfer_value);
                if sent < required {
                    return Err(Error::InsufficientFunds(required));
                }
            }

            let id = self.next_token_id;
            self.next_token_id = self.next_token_id.checked_add(1).ok_or(Error::Overflow)?;

            let mut token = Token {
                incremental_value,
                activation_threshold,
                restricted,
                data,
                last_activity: now,
                ..Token::default()
            };

            if plane != 0 {
                if plane > self.plane_count {
                    return Err(Error::InvalidLink);
                }
                let fee = self
                    .coin_rate
                    .checked_mul(fees::plane_fee_multiplier(plane))
                    .ok_or(Error::Overflow)?;
                if !self.coin_transfer_from(caller, fee) {
                    return Err(Error::CoinTransferFailed(fee));
                }
                let plane_id = plane as TokenId;
                let plane_token = self.token_of(plane_id)?;
                let bonus = affinity::affinity_bonus(
                    &token.data,
                    &plane_token.data,
                    DEFAULT_LINK_EFFICIENCY,
                    token.active_charge,
                    plane_token.active_charge,
                );
                token.links.push(plane_id);
                self.link_efficiency.insert(
                    (id, plane_id),
                    &LinkEfficiency {
                        base: DEFAULT_LINK_EFFICIENCY,
                        affinity_bonus: bonus,
                    },
                );
            }

            if sent > 0 {
                token.value = sent;
                self.record_contribution(id, &mut token, caller, 0, sent)?;
                self.env().emit_event(ValueContributed {
                    token_id: id,
                    contributor: caller,
                    value: sent,
                });
            }

            self.token_owner.insert(id, &caller);
            let count = self.owned_count.get(caller).unwrap_or(0);
            self.owned_count.insert(caller, &count.saturating_add(1));
            self.tokens.insert(id, &token);

            if restricted {
                self.env().emit_event(TokenRestricted { token_id: id });
            }
            self.env().emit_event(TokenCreated {
                token_id: id,
                owner: caller,
                plane,
            });
            Ok(id)
        }

        // =====================================================================
        // CHARGING
        // =====================================================================

        /// Charge a sigil with `coins` units of the companion coin. The
        /// attached value must cover `incremental_value × coins / coin_scale`.
        ///
        /// Inactive sigils bank the charge toward activation; active sigils
        /// route it through the link graph (or straight into `active_charge`
        /// when unlinked).
        #[ink(message, payable)]
        pub fn charge_token(&mut self, token_id: TokenId, coins: Balance) -> Result<(), Error> {
            self.assert_not_paused()?;
            let caller = self.env().caller();
            self.assert_participant(caller)?;
            let value = self.env().transferred_value();
            self.charge_internal(caller, token_id, coins, value, false)?;
            Ok(())
        }

        /// Value-only contribution. On a sigil with a nonzero incremental
        /// value the funding also banks the implied coin-equivalent charge;
        /// on an active sigil the value accrues to the owner.
        #[ink(message, payable)]
        pub fn fund_token(&mut self, token_id: TokenId) -> Result<(), Error> {
            self.assert_not_paused()?;
            let caller = self.env().caller();
            self.assert_participant(caller)?;
            let value = self.env().transferred_value();
            if value == 0 {
                return Err(Error::InsufficientFunds(1));
            }
            let mut token = self.token_of(token_id)?;
            if token.restricted && !self.is_whitelisted(token_id, caller) {
                return Err(Error::Restricted);
            }
            if Self::batch_in_progress(&token) {
                return Err(Error::BatchOperationInProgress);
            }

            if token.active {
                let owner = self.token_owner.get(token_id).ok_or(Error::TokenNotFound)?;
                self.credit_pending(owner, value, 0)?;
            } else {
                let coins = if token.incremental_value > 0 {
                    value
                        .checked_mul(self.coin_scale)
                        .ok_or(Error::Overflow)?
                        / token.incremental_value
                } else {
                    0
                };
                self.record_contribution(token_id, &mut token, caller, coins, value)?;
                token.charge = token.charge.checked_add(coins).ok_or(Error::Overflow)?;
                token.value = token.value.checked_add(value).ok_or(Error::Overflow)?;
            }
            token.last_activity = self.env().block_timestamp();
            self.tokens.insert(token_id, &token);
            self.env().emit_event(ValueContributed {
                token_id,
                contributor: caller,
                value,
            });
            Ok(())
        }

        /// Shared charge path. `via_link = true` relaxes validation, skips the
        /// external coin debit (link charge moves internal claim units), and
        /// reports failure as `Ok(false)` instead of reverting so a fanout can
        /// skip busy or restricted destinations.
        fn charge_internal(
            &mut self,
            contributor: AccountId,
            token_id: TokenId,
            coins: Balance,
            value: Balance,
            via_link: bool,
        ) -> Result<bool, Error> {
            let mut token = match self.tokens.get(token_id) {
                Some(t) => t,
                None if via_link => return Ok(false),
                None => return Err(Error::TokenNotFound),
            };

            if token.restricted && !self.is_whitelisted(token_id, contributor) {
                if via_link {
                    return Ok(false);
                }
                return Err(Error::Restricted);
            }
            if Self::batch_in_progress(&token) {
                if via_link {
                    return Ok(false);
                }
                return Err(Error::BatchOperationInProgress);
            }

            if via_link {
                if coins == 0 {
                    return Ok(false);
                }
            } else {
                let required = token
                    .incremental_value
                    .checked_mul(coins)
                    .ok_or(Error::Overflow)?
                    / self.coin_scale;
                if value < required {
                    return Err(Error::InsufficientFunds(required));
                }
                if !self.coin_transfer_from(contributor, coins) {
                    return Err(Error::CoinTransferFailed(coins));
                }
            }

            token.last_activity = self.env().block_timestamp();
            if token.active {
                self.charge_active(token_id, &mut token, contributor, coins, value, via_link)?;
            } else {
                self.record_contribution(token_id, &mut token, contributor, coins, value)?;
                token.charge = token.charge.checked_add(coins).ok_or(Error::Overflow)?;
                token.value = token.value.checked_add(value).ok_or(Error::Overflow)?;
                self.env().emit_event(TokenCharged {
                    token_id,
                    contributor,
                    coins,
                    value,
                });
            }
            self.tokens.insert(token_id, &token);
            Ok(true)
        }

        /// Active-charge handling with deterministic even-split link fanout.
        ///
        /// Each link receives `coins / n / 100 × base_efficiency` plus
        /// `coins / 100 × affinity_bonus` coins and an even `value / n` share.
        /// An edge that fails (busy or restricted destination) folds its coins
        /// back into this sigil's `active_charge`; its value share stays in
        /// the leftover, which pools to the owner.
        fn charge_active(
            &mut self,
            token_id: TokenId,
            token: &mut Token,
            contributor: AccountId,
            coins: Balance,
            value: Balance,
            via_link: bool,
        ) -> Result<(), Error> {
            if via_link || token.links.is_empty() {
                token.active_charge = token.active_charge.checked_add(coins).ok_or(Error::Overflow)?;
                token.value = token.value.checked_add(value).ok_or(Error::Overflow)?;
                self.env().emit_event(ActiveCharge {
                    token_id,
                    coins,
                    value,
                });
                return Ok(());
            }

            let count = token.links.len() as u128;
            let value_per_link = value / count;
            let mut remaining_value = value;
            let mut kept_coins: Balance = 0;

            let links = token.links.clone();
            for link_id in links {
                let eff = self
                    .link_efficiency
                    .get((token_id, link_id))
                    .unwrap_or_default();
                let linked = (coins / count / 100)
                    .checked_mul(eff.base as u128)
                    .ok_or(Error::Overflow)?;
                let bonus = (coins / 100)
                    .checked_mul(eff.affinity_bonus)
                    .ok_or(Error::Overflow)?;
                let edge_coins = linked.checked_add(bonus).ok_or(Error::Overflow)?;
                let delivered =
                    self.charge_internal(contributor, link_id, edge_coins, value_per_link, true)?;
                if delivered {
                    remaining_value = remaining_value.saturating_sub(value_per_link);
                } else {
                    kept_coins = kept_coins.checked_add(edge_coins).ok_or(Error::Overflow)?;
                }
            }

            token.active_charge = token
                .active_charge
                .checked_add(kept_coins)
                .ok_or(Error::Overflow)?;
            if remaining_value > 0 {
                let owner = self.token_owner.get(token_id).ok_or(Error::TokenNotFound)?;
                self.credit_pending(owner, remaining_value, 0)?;
            }
            self.env().emit_event(ActiveCharge {
                token_id,
                coins,
                value,
            });
            Ok(())
        }

        // =====================================================================
        // LIFECYCLE — activate / deactivate / discharge / destroy
        // =====================================================================

        /// Activate a sigil whose charge has met its threshold, distributing
        /// the banked charge/value to contributors in bounded slices.
        ///
        /// Returns `false` while the batch is incomplete; calling again
        /// resumes from the stored cursor. The state transition to active
        /// happens exactly once, on the completing call.
        #[ink(message)]
        pub fn activate_token(&mut self, token_id: TokenId) -> Result<bool, Error> {
            self.assert_not_paused()?;
            let mut token = self.token_of(token_id)?;
            if token.active {
                return Err(Error::TokenCannotBeActivated);
            }
            if token.discharging || token.discharge_index > 0 {
                return Err(Error::BatchOperationInProgress);
            }
            if !token.activating && token.charge < token.activation_threshold {
                return Err(Error::TokenCannotBeActivated);
            }

            token.activating = true;
            let complete = self.distribute(token_id, &mut token, false)?;
            if complete {
                token.active = true;
                token.activating = false;
            }
            token.last_activity = self.env().block_timestamp();
            self.tokens.insert(token_id, &token);
            self.env().emit_event(TokenActivated { token_id, complete });
            Ok(complete)
        }

        /// Deactivate an active sigil with no pending unprocessed charge.
        /// Requires the global minimum funding payment.
        #[ink(message, payable)]
        pub fn deactivate_token(&mut self, token_id: TokenId) -> Result<(), Error> {
            self.assert_not_paused()?;
            let caller = self.env().caller();
            let mut token = self.token_of(token_id)?;
            if self.token_owner.get(token_id) != Some(caller) {
                return Err(Error::NotTokenOwner);
            }
            if !token.active || token.charge > 0 || Self::batch_in_progress(&token) {
                return Err(Error::TokenCannotBeDeactivated);
            }
            let sent = self.env().transferred_value();
            if sent < self.transfer_value {
                return Err(Error::InsufficientFunds(self.transfer_value));
            }
            self.pooled_value = self.pooled_value.checked_add(sent).ok_or(Error::Overflow)?;

            token.active = false;
            token.last_activity = self.env().block_timestamp();
            self.tokens.insert(token_id, &token);
            self.env().emit_event(TokenDeactivated { token_id });
            Ok(())
        }

        /// Discharge a sigil: return contributions to contributors (inactive)
        /// or pool them to the owner (active), then zero the contribution
        /// ledger. Resumable; returns `false` until both sub-phases complete.
        #[ink(message, payable)]
        pub fn discharge_token(&mut self, token_id: TokenId) -> Result<bool, Error> {
            self.discharge_impl(token_id, false)
        }

        /// Discharge with `burn = true`: on final completion all sigil storage
        /// is deleted and the non-fungible asset is burned.
        #[ink(message, payable)]
        pub fn destroy_token(&mut self, token_id: TokenId) -> Result<bool, Error> {
            self.discharge_impl(token_id, true)
        }

        fn discharge_impl(&mut self, token_id: TokenId, burn: bool) -> Result<bool, Error> {
            self.assert_not_paused()?;
            let caller = self.env().caller();
            let now = self.env().block_timestamp();
            let mut token = self.token_of(token_id)?;
            if self.token_owner.get(token_id) != Some(caller) {
                return Err(Error::NotTokenOwner);
            }
            if token.activating {
                return Err(Error::ActivationInProgress);
            }
            let in_progress =
                token.discharging || token.discharge_index > 0 || token.distribution_index > 0;
            if !in_progress
                && !burn
                && token.charge == 0
                && token.value == 0
                && token.contributor_count == 0
            {
                return Err(Error::NothingToDischarge);
            }

            let required = self
                .transfer_value
                .checked_mul((token.links.len() as u128).max(1))
                .ok_or(Error::Overflow)?;
            let sent = self.env().transferred_value();
            if sent < required {
                return Err(Error::InsufficientFunds(required));
            }
            self.pooled_value = self.pooled_value.checked_add(sent).ok_or(Error::Overflow)?;

            token.discharging = true;
            let was_active = token.active;

            // Distribution sub-phase. Skipped once the clear cursor is set:
            // the distribution walk finished in an earlier call.
            if token.discharge_index == 0 {
                let complete = self.distribute(token_id, &mut token, !was_active)?;
                if !complete {
                    token.last_activity = now;
                    self.tokens.insert(token_id, &token);
                    self.env().emit_event(TokenDischarged {
                        token_id,
                        complete: false,
                    });
                    return Ok(false);
                }
            }

            // Clear sub-phase: zero contribution rows in bounded slices.
            let start = token.discharge_index;
            let end = start
                .saturating_add(self.batch_size)
                .min(token.contributor_count);
            let mut reached_end = end >= token.contributor_count;
            for idx in start..end {
                let who = match self.contributors.get((token_id, idx)) {
                    Some(a) => a,
                    None => {
                        reached_end = true;
                        break;
                    }
                };
                if let Some(mut c) = self.contributions.get((token_id, who)) {
                    // Whitelisting is sticky; everything else resets.
                    c.charge = 0;
                    c.value = 0;
                    c.exists = false;
                    c.distributed = false;
                    self.contributions.insert((token_id, who), &c);
                }
                self.contributors.remove((token_id, idx));
            }

            if reached_end {
                token.contributor_count = 0;
                token.discharge_index = 0;
                token.discharging = false;
                token.active = false;
                if burn {
                    self.burn_token(token_id, &token);
                    self.env().emit_event(TokenDestroyed { token_id });
                    return Ok(true);
                }
                token.last_activity = now;
                self.tokens.insert(token_id, &token);
                self.env().emit_event(TokenDischarged {
                    token_id,
                    complete: true,
                });
                Ok(true)
            } else {
                token.discharge_index = end;
                token.last_activity = now;
                self.tokens.insert(token_id, &token);
                self.env().emit_event(TokenDischarged {
                    token_id,
                    complete: false,
                });
                Ok(false)
            }
        }

        fn burn_token(&mut self, token_id: TokenId, token: &Token) {
            for link_id in &token.links {
                self.link_efficiency.remove((token_id, *link_id));
            }
            if token.external_ref != 0 {
                self.external_tokens.remove(token.external_ref);
            }
            if let Some(owner) = self.token_owner.get(token_id) {
                let count = self.owned_count.get(owner).unwrap_or(1);
                self.owned_count.insert(owner, &count.saturating_sub(1));
            }
            self.token_owner.remove(token_id);
            self.tokens.remove(token_id);
        }

        // =====================================================================
        // BATCHED DISTRIBUTION ENGINE
        // =====================================================================

        /// Walk the contributor list from the stored cursor, crediting the
        /// distribution ledger in slices of `batch_size` (discharge mode) or
        /// `2 × batch_size` (activation mode). Returns `true` once the list
        /// is fully swept and the pass finalized.
        ///
        /// The epoch is frozen first: pending `charge`/`value` ratchet into
        /// `distribution_charge`/`distribution_value`, so amounts processed
        /// are monotonic even if the pass spans many calls.
        fn distribute(
            &mut self,
            token_id: TokenId,
            token: &mut Token,
            discharge_mode: bool,
        ) -> Result<bool, Error> {
            if token.charge > token.distribution_charge {
                token.distribution_charge = token.charge;
            }
            token.charge = 0;
            if token.value > token.distribution_value {
                token.distribution_value = token.value;
            }
            token.value = 0;

            // Per-coin value rate, fixed for the whole pass.
            if token.distribution_index == 0 {
                token.distribution_rate = if !discharge_mode
                    && token.distribution_charge >= self.coin_scale
                {
                    token.distribution_value / (token.distribution_charge / self.coin_scale)
                } else {
                    0
                };
            }

            let slice = if discharge_mode {
                self.batch_size
            } else {
                self.batch_size.saturating_mul(2)
            };
            let start = token.distribution_index;
            let end = start.saturating_add(slice).min(token.contributor_count);
            let mut reached_end = end >= token.contributor_count;
            let mut owner_pool: Balance = 0;

            for idx in start..end {
                let who = match self.contributors.get((token_id, idx)) {
                    // A missing slot is the zero-address sentinel: stop here.
                    Some(a) => a,
                    None => {
                        reached_end = true;
                        break;
                    }
                };

                // The wrapped-asset row is never paid out; it is recovered
                // out-of-band via recall once marked.
                if idx == 0 && token.external_ref != 0 {
                    token.recallable = true;
                    let mut c = self.contributions.get((token_id, who)).unwrap_or_default();
                    c.distributed = true;
                    self.contributions.insert((token_id, who), &c);
                    continue;
                }

                let mut c = self.contributions.get((token_id, who)).unwrap_or_default();
                if !c.distributed {
                    if discharge_mode {
                        self.credit_pending(who, c.value, c.charge)?;
                        token.distribution_value =
                            token.distribution_value.saturating_sub(c.value);
                    } else {
                        owner_pool = owner_pool.checked_add(c.value).ok_or(Error::Overflow)?;
                        let mut share = token
                            .distribution_rate
                            .checked_mul(c.charge)
                            .ok_or(Error::Overflow)?
                            / self.coin_scale;
                        share = share.min(token.distribution_value);
                        token.distribution_value -= share;
                        self.credit_pending(who, share, self.coin_scale)?;
                    }
                    c.distributed = true;
                    self.contributions.insert((token_id, who), &c);
                }
            }

            if owner_pool > 0 {
                let owner = self.token_owner.get(token_id).ok_or(Error::TokenNotFound)?;
                self.credit_pending(owner, owner_pool, 0)?;
            }

            if reached_end {
                token.distribution_index = 0;
                let leftover = token.distribution_value;
                token.distribution_value = 0;
                if discharge_mode {
                    if leftover > 0 {
                        let owner = self.token_owner.get(token_id).ok_or(Error::TokenNotFound)?;
                        self.credit_pending(owner, leftover, 0)?;
                    }
                } else {
                    token.active_charge = token
                        .active_charge
                        .checked_add(token.distribution_charge)
                        .ok_or(Error::Overflow)?;
                    if leftover > 0 {
                        self.pooled_value = self
                            .pooled_value
                            .checked_add(leftover)
                            .ok_or(Error::Overflow)?;
                        self.env().emit_event(ValuePooled { amount: leftover });
                    }
                }
                token.distribution_charge = 0;
                token.distribution_rate = 0;
                Ok(true)
            } else {
                token.distribution_index = end;
                Ok(false)
            }
        }

        // =====================================================================
        // CONTRIBUTION LEDGER (internal)
        // =====================================================================

        /// Record a contribution. Unseen contributors append to the list; a
        /// previously distributed entry is re-armed (zeroed) before adding.
        fn record_contribution(
            &mut self,
            token_id: TokenId,
            token: &mut Token,
            contributor: AccountId,
            charge: Balance,
            value: Balance,
        ) -> Result<(), Error> {
            let mut c = self
                .contributions
                .get((token_id, contributor))
                .unwrap_or_default();
            if !c.exists {
                self.contributors
                    .insert((token_id, token.contributor_count), &contributor);
                token.contributor_count = token
                    .contributor_count
                    .checked_add(1)
                    .ok_or(Error::Overflow)?;
                c.exists = true;
            }
            if c.distributed {
                c.charge = 0;
                c.value = 0;
                c.distributed = false;
            }
            c.charge = c.charge.checked_add(charge).ok_or(Error::Overflow)?;
            c.value = c.value.checked_add(value).ok_or(Error::Overflow)?;
            self.contributions.insert((token_id, contributor), &c);
            self.env().emit_event(ContributionRecorded {
                token_id,
                contributor,
                charge,
                value,
            });
            Ok(())
        }

        /// Whitelist an address on a restricted sigil. Idempotent; the flag
        /// never reverts to false.
        #[ink(message)]
        pub fn whitelist(&mut self, token_id: TokenId, account: AccountId) -> Result<(), Error> {
            let caller = self.env().caller();
            self.token_of(token_id)?;
            if self.token_owner.get(token_id) != Some(caller) {
                return Err(Error::NotTokenOwner);
            }
            self.whitelist_internal(token_id, account);
            Ok(())
        }

        fn whitelist_internal(&mut self, token_id: TokenId, account: AccountId) {
            let mut c = self
                .contributions
                .get((token_id, account))
                .unwrap_or_default();
            if !c.whitelisted {
                c.whitelisted = true;
                self.contributions.insert((token_id, account), &c);
                self.env().emit_event(Whitelisted { token_id, account });
            }
        }

        fn is_whitelisted(&self, token_id: TokenId, account: AccountId) -> bool {
            self.contributions
                .get((token_id, account))
                .map(|c| c.whitelisted)
                .unwrap_or(false)
        }

        // =====================================================================
        // LINK GRAPH
        // =====================================================================

        /// Create or upgrade a link. Re-linking may only raise the base
        /// efficiency; the payment must cover both endpoints' incremental
        /// value and is split evenly as a value contribution to each side.
        /// The coin fee grows quadratically above the per-link-count
        /// efficiency allowance (see [`fees::link_fee_units`]).
        #[ink(message, payable)]
        pub fn link_tokens(
            &mut self,
            token_id: TokenId,
            link_id: TokenId,
            efficiency: u8,
        ) -> Result<(), Error> {
            self.assert_not_paused()?;
            let caller = self.env().caller();
            self.assert_participant(caller)?;
            if token_id == link_id {
                return Err(Error::InvalidLink);
            }
            let mut token = self.token_of(token_id)?;
            let mut dest = self.token_of(link_id)?;
            if self.token_owner.get(token_id) != Some(caller) {
                return Err(Error::NotTokenOwner);
            }
            if dest.restricted && !self.is_whitelisted(link_id, caller) {
                return Err(Error::Restricted);
            }
            if Self::batch_in_progress(&token) || Self::batch_in_progress(&dest) {
                return Err(Error::BatchOperationInProgress);
            }

            let is_new = match self.link_efficiency.get((token_id, link_id)) {
                Some(existing) if existing.base > 0 => {
                    if efficiency <= existing.base {
                        return Err(Error::InvalidLink);
                    }
                    false
                }
                _ => {
                    if token.links.len() >= fees::MAX_LINKS {
                        return Err(Error::TooManyLinks);
                    }
                    true
                }
            };

            let required = token
                .incremental_value
                .checked_add(dest.incremental_value)
                .ok_or(Error::Overflow)?;
            let sent = self.env().transferred_value();
            if sent < required {
                return Err(Error::InsufficientFunds(required));
            }

            let link_count = token.links.len() as u32 + u32::from(is_new);
            let fee = fees::link_fee_units(efficiency, link_count)
                .checked_mul(self.coin_rate)
                .ok_or(Error::Overflow)?;
            if fee > 0 && !self.coin_transfer_from(caller, fee) {
                return Err(Error::CoinTransferFailed(fee));
            }

            if is_new {
                token.links.push(link_id);
            }

            // Payment split evenly as value-contribution to both endpoints.
            let half = sent / 2;
            if half > 0 {
                token.value = token.value.checked_add(half).ok_or(Error::Overflow)?;
                self.record_contribution(token_id, &mut token, caller, 0, half)?;
                let rest = sent - half;
                dest.value = dest.value.checked_add(rest).ok_or(Error::Overflow)?;
                self.record_contribution(link_id, &mut dest, caller, 0, rest)?;
            }

            let bonus = affinity::affinity_bonus(
                &token.data,
                &dest.data,
                efficiency,
                token.active_charge,
                dest.active_charge,
            );
            self.link_efficiency.insert(
                (token_id, link_id),
                &LinkEfficiency {
                    base: efficiency,
                    affinity_bonus: bonus,
                },
            );

            token.last_activity = self.env().block_timestamp();
            self.tokens.insert(token_id, &token);
            self.tokens.insert(link_id, &dest);
            self.env().emit_event(TokenLinked {
                token_id,
                link_id,
                efficiency,
                affinity_bonus: bonus,
            });
            Ok(())
        }

        /// Remove a link (swap-with-last; adjacency order is not preserved).
        #[ink(message)]
        pub fn unlink_tokens(&mut self, token_id: TokenId, link_id: TokenId) -> Result<(), Error> {
            self.assert_not_paused()?;
            let caller = self.env().caller();
            let mut token = self.token_of(token_id)?;
            if self.token_owner.get(token_id) != Some(caller) {
                return Err(Error::NotTokenOwner);
            }
            if Self::batch_in_progress(&token) {
                return Err(Error::BatchOperationInProgress);
            }
            let pos = token
                .links
                .iter()
                .position(|l| *l == link_id)
                .ok_or(Error::InvalidLink)?;
            token.links.swap_remove(pos);
            self.link_efficiency.remove((token_id, link_id));
            token.last_activity = self.env().block_timestamp();
            self.tokens.insert(token_id, &token);
            self.env().emit_event(TokenUnlinked { token_id, link_id });
            Ok(())
        }

        // =====================================================================
        // TOKEN TERMS
        // =====================================================================

        /// Update charging terms. Rejected while a batch cursor is active so
        /// an in-progress sweep never sees its rate change.
        #[ink(message)]
        pub fn update_token(
            &mut self,
            token_id: TokenId,
            incremental_value: Balance,
            activation_threshold: Balance,
        ) -> Result<(), Error> {
            self.assert_not_paused()?;
            let caller = self.env().caller();
            let mut token = self.token_of(token_id)?;
            if self.token_owner.get(token_id) != Some(caller) {
                return Err(Error::NotTokenOwner);
            }
            if Self::batch_in_progress(&token) {
                return Err(Error::BatchOperationInProgress);
            }
            token.incremental_value = incremental_value;
            token.activation_threshold = activation_threshold;
            token.last_activity = self.env().block_timestamp();
            self.tokens.insert(token_id, &token);
            self.env().emit_event(TokenUpdated {
                token_id,
                incremental_value,
                activation_threshold,
            });
            Ok(())
        }

        /// Restrict a sigil to whitelisted contributors. Requires the
        /// restricted-creation minimum payment.
        #[ink(message, payable)]
        pub fn restrict_token(&mut self, token_id: TokenId) -> Result<(), Error> {
            self.assert_not_paused()?;
            let caller = self.env().caller();
            let mut token = self.token_of(token_id)?;
            if self.token_owner.get(token_id) != Some(caller) {
                return Err(Error::NotTokenOwner);
            }
            if Self::batch_in_progress(&token) {
                return Err(Error::BatchOperationInProgress);
            }
            let required = token.incremental_value.max(self.transfer_value);
            let sent = self.env().transferred_value();
            if sent < required {
                return Err(Error::InsufficientFunds(required));
            }
            self.pooled_value = self.pooled_value.checked_add(sent).ok_or(Error::Overflow)?;
            token.restricted = true;
            token.last_activity = self.env().block_timestamp();
            self.tokens.insert(token_id, &token);
            self.env().emit_event(TokenRestricted { token_id });
            Ok(())
        }

        // =====================================================================
        // DISTRIBUTION LEDGER — withdrawal
        // =====================================================================

        /// Withdraw pending value and coins. Returns `(coins, value)` actually
        /// delivered this call.
        ///
        /// A time-decayed bonus of `floor(Δt / BONUS_INTERVAL) × coin_scale`
        /// coins, capped at `coin_rate`, accrues to callers holding a sigil,
        /// a coin balance, or donating at least `transfer_value` in this call.
        ///
        /// A failed native transfer reverts the whole call. A failed coin
        /// transfer is recoverable: the coins return to the pending balance
        /// and zero coins are reported delivered.
        #[ink(message, payable)]
        pub fn withdraw(&mut self) -> Result<(Balance, Balance), Error> {
            let caller = self.env().caller();
            let donation = self.env().transferred_value();
            if donation > 0 {
                self.pooled_value = self
                    .pooled_value
                    .checked_add(donation)
                    .ok_or(Error::Overflow)?;
            }
            let mut d = self.distributions.get(caller).unwrap_or_default();

            let eligible = self.owned_count.get(caller).unwrap_or(0) > 0
                || self.coin_balance_of(caller) > 0
                || donation >= self.transfer_value;
            if eligible {
                let now = self.env().block_timestamp();
                if d.time == 0 {
                    d.time = now;
                } else {
                    let intervals =
                        Balance::from(now.saturating_sub(d.time) / BONUS_INTERVAL_MS);
                    let bonus = intervals
                        .checked_mul(self.coin_scale)
                        .ok_or(Error::Overflow)?
                        .min(self.coin_rate);
                    if bonus > 0 {
                        d.coins = d.coins.checked_add(bonus).ok_or(Error::Overflow)?;
                    }
                    d.time = now;
                }
            }

            let value = d.value;
            let coins = d.coins;
            // Pending is zeroed before the native transfer hands control away.
            d.value = 0;
            d.coins = 0;
            self.distributions.insert(caller, &d);

            if value > 0 {
                self.env()
                    .transfer(caller, value)
                    .map_err(|_| Error::TransferFailed)?;
            }

            let mut delivered: Balance = 0;
            if coins > 0 {
                if self.coin_transfer(caller, coins) {
                    delivered = coins;
                } else {
                    let mut restored = self.distributions.get(caller).unwrap_or_default();
                    restored.coins = restored.coins.checked_add(coins).ok_or(Error::Overflow)?;
                    self.distributions.insert(caller, &restored);
                }
            }

            self.env().emit_event(Withdrawal {
                account: caller,
                value,
                coins: delivered,
            });
            Ok((delivered, value))
        }

        fn credit_pending(
            &mut self,
            account: AccountId,
            value: Balance,
            coins: Balance,
        ) -> Result<(), Error> {
            if value == 0 && coins == 0 {
                return Ok(());
            }
            let mut d = self.distributions.get(account).unwrap_or_default();
            d.value = d.value.checked_add(value).ok_or(Error::Overflow)?;
            d.coins = d.coins.checked_add(coins).ok_or(Error::Overflow)?;
            self.distributions.insert(account, &d);
            self.env().emit_event(PendingDistribution {
                account,
                value,
                coins,
            });
            Ok(())
        }

        // =====================================================================
        // OWNERSHIP
        // =====================================================================

        /// Transfer a sigil. The receiver is auto-whitelisted against it and
        /// the activity stamp refreshes.
        #[ink(message)]
        pub fn transfer_token(&mut self, token_id: TokenId, to: AccountId) -> Result<(), Error> {
            self.assert_not_paused()?;
            let caller = self.env().caller();
            self.assert_participant(to)?;
            let mut token = self.token_of(token_id)?;
            if self.token_owner.get(token_id) != Some(caller) {
                return Err(Error::NotTokenOwner);
            }
            self.move_ownership(token_id, caller, to);
            self.whitelist_internal(token_id, to);
            token.last_activity = self.env().block_timestamp();
            self.tokens.insert(token_id, &token);
            self.env().emit_event(TokenTransferred {
                token_id,
                from: caller,
                to,
            });
            Ok(())
        }

        fn move_ownership(&mut self, token_id: TokenId, from: AccountId, to: AccountId) {
            let from_count = self.owned_count.get(from).unwrap_or(1);
            self.owned_count.insert(from, &from_count.saturating_sub(1));
            let to_count = self.owned_count.get(to).unwrap_or(0);
            self.owned_count.insert(to, &to_count.saturating_add(1));
            self.token_owner.insert(token_id, &to);
        }

        // =====================================================================
        // EXTERNAL ASSET WRAPPING
        // =====================================================================

        /// Wrap a deposited external asset as a fresh sigil owned by the
        /// depositor. The depositor occupies contributor slot 0, which the
        /// distribution engine marks recallable instead of paying out.
        #[ink(message)]
        pub fn receive_external_asset(
            &mut self,
            external_id: u64,
            depositor: AccountId,
            data: Vec<u8>,
        ) -> Result<TokenId, Error> {
            self.assert_not_paused()?;
            self.assert_participant(depositor)?;
            if external_id == 0 || self.external_tokens.contains(external_id) {
                return Err(Error::InvalidExternalAsset);
            }
            let now = self.env().block_timestamp();

            let id = self.next_token_id;
            self.next_token_id = self.next_token_id.checked_add(1).ok_or(Error::Overflow)?;
            let mut token = Token {
                data,
                external_ref: external_id,
                last_activity: now,
                ..Token::default()
            };
            self.record_contribution(id, &mut token, depositor, 0, 0)?;

            self.token_owner.insert(id, &depositor);
            let count = self.owned_count.get(depositor).unwrap_or(0);
            self.owned_count.insert(depositor, &count.saturating_add(1));
            self.external_tokens.insert(external_id, &id);
            self.tokens.insert(id, &token);
            self.env().emit_event(ExternalAssetWrapped {
                external_id,
                token_id: id,
                depositor,
            });
            Ok(id)
        }

        /// Recall a wrapped external asset. Requires a fully completed
        /// discharge cycle: the batch pass must have marked the wrapper
        /// recallable and the clear sub-phase must have emptied the
        /// contributor list, so no pending contributor return can be lost
        /// and the call touches a fixed number of storage cells. Burns the
        /// wrapping sigil and returns the external id for the out-of-band
        /// asset return.
        #[ink(message)]
        pub fn recall_external_asset(&mut self, token_id: TokenId) -> Result<u64, Error> {
            self.assert_not_paused()?;
            let caller = self.env().caller();
            let token = self.token_of(token_id)?;
            if self.token_owner.get(token_id) != Some(caller) {
                return Err(Error::NotTokenOwner);
            }
            if token.external_ref == 0 {
                return Err(Error::InvalidExternalAsset);
            }
            if !token.recallable
                || token.contributor_count != 0
                || Self::batch_in_progress(&token)
            {
                return Err(Error::NotRecallable);
            }
            let external_id = token.external_ref;
            self.burn_token(token_id, &token);
            self.env().emit_event(ExternalAssetRecalled {
                external_id,
                token_id,
            });
            Ok(external_id)
        }

        // =====================================================================
        // ADMINISTRATION
        // =====================================================================

        /// Update the global rate parameters. `transfer_value` must stay
        /// within 90–100% of `incremental_value`.
        #[ink(message)]
        pub fn configure(
            &mut self,
            coin_rate: Balance,
            incremental_value: Balance,
            transfer_value: Balance,
            batch_size: u32,
        ) -> Result<(), Error> {
            self.only_owner()?;
            let band_ok = transfer_value <= incremental_value
                && transfer_value
                    .checked_mul(10)
                    .ok_or(Error::Overflow)?
                    >= incremental_value
                        .checked_mul(9)
                        .ok_or(Error::Overflow)?;
            if coin_rate == 0 || batch_size == 0 || !band_ok {
                return Err(Error::InvalidConfiguration);
            }
            self.coin_rate = coin_rate;
            self.incremental_value = incremental_value;
            self.transfer_value = transfer_value;
            self.batch_size = batch_size;
            self.env().emit_event(ConfigUpdated {
                coin_rate,
                incremental_value,
                transfer_value,
                batch_size,
            });
            Ok(())
        }

        #[ink(message)]
        pub fn set_paused(&mut self, paused: bool) -> Result<(), Error> {
            self.only_owner()?;
            self.paused = paused;
            self.env().emit_event(PausedSet { paused });
            Ok(())
        }

        #[ink(message)]
        pub fn set_blacklisted(&mut self, account: AccountId, blacklisted: bool) -> Result<(), Error> {
            self.only_owner()?;
            self.blacklist.insert(account, &blacklisted);
            self.env().emit_event(BlacklistUpdated {
                account,
                blacklisted,
            });
            Ok(())
        }

        /// Self-service exclusion from the system. Fee-gated.
        #[ink(message, payable)]
        pub fn opt_out(&mut self) -> Result<(), Error> {
            self.charge_opt_fee()?;
            self.opted_out.insert(self.env().caller(), &true);
            Ok(())
        }

        /// Rejoin after an opt-out. Fee-gated.
        #[ink(message, payable)]
        pub fn opt_in(&mut self) -> Result<(), Error> {
            self.charge_opt_fee()?;
            self.opted_out.insert(self.env().caller(), &false);
            Ok(())
        }

        fn charge_opt_fee(&mut self) -> Result<(), Error> {
            let sent = self.env().transferred_value();
            if sent < self.transfer_value {
                return Err(Error::InsufficientFunds(self.transfer_value));
            }
            self.pooled_value = self.pooled_value.checked_add(sent).ok_or(Error::Overflow)?;
            Ok(())
        }

        /// Recover a sigil from a blacklisted or long-inactive holder.
        #[ink(message)]
        pub fn rescue_token(&mut self, token_id: TokenId, to: AccountId) -> Result<(), Error> {
            self.only_owner()?;
            self.assert_participant(to)?;
            let mut token = self.token_of(token_id)?;
            let holder = self.token_owner.get(token_id).ok_or(Error::TokenNotFound)?;
            let now = self.env().block_timestamp();
            let eligible = self.blacklist.get(holder).unwrap_or(false)
                || now.saturating_sub(token.last_activity) >= INACTIVITY_PERIOD_MS;
            if !eligible {
                return Err(Error::RescueNotEligible);
            }
            self.move_ownership(token_id, holder, to);
            self.whitelist_internal(token_id, to);
            token.last_activity = now;
            self.tokens.insert(token_id, &token);
            self.env().emit_event(TokenRescued { token_id, to });
            Ok(())
        }

        // =====================================================================
        // VIEWS
        // =====================================================================

        #[ink(message)]
        pub fn get_token(&self, token_id: TokenId) -> Option<Token> {
            self.tokens.get(token_id)
        }

        #[ink(message)]
        pub fn owner_of(&self, token_id: TokenId) -> Option<AccountId> {
            self.token_owner.get(token_id)
        }

        #[ink(message)]
        pub fn get_contribution(
            &self,
            token_id: TokenId,
            account: AccountId,
        ) -> Option<Contribution> {
            self.contributions.get((token_id, account))
        }

        #[ink(message)]
        pub fn get_distribution(&self, account: AccountId) -> Option<Distribution> {
            self.distributions.get(account)
        }

        #[ink(message)]
        pub fn get_link(&self, token_id: TokenId, link_id: TokenId) -> Option<LinkEfficiency> {
            self.link_efficiency.get((token_id, link_id))
        }

        /// Outbound adjacency list, empty for unknown ids.
        #[ink(message)]
        pub fn links_of(&self, token_id: TokenId) -> Vec<TokenId> {
            self.tokens
                .get(token_id)
                .map(|t| t.links)
                .unwrap_or_default()
        }

        #[ink(message)]
        pub fn contributor_at(&self, token_id: TokenId, index: u32) -> Option<AccountId> {
            self.contributors.get((token_id, index))
        }

        #[ink(message)]
        pub fn balance_owned(&self, account: AccountId) -> u32 {
            self.owned_count.get(account).unwrap_or(0)
        }

        #[ink(message)]
        pub fn pooled_value(&self) -> Balance {
            self.pooled_value
        }

        #[ink(message)]
        pub fn is_paused(&self) -> bool {
            self.paused
        }

        #[ink(message)]
        pub fn plane_count(&self) -> u32 {
            self.plane_count
        }

        /// `(coin_scale, coin_rate, incremental_value, transfer_value, batch_size)`.
        #[ink(message)]
        pub fn config(&self) -> (Balance, Balance, Balance, Balance, u32) {
            (
                self.coin_scale,
                self.coin_rate,
                self.incremental_value,
                self.transfer_value,
                self.batch_size,
            )
        }

        // =====================================================================
        // INTERNAL HELPERS
        // =====================================================================

        fn token_of(&self, token_id: TokenId) -> Result<Token, Error> {
            self.tokens.get(token_id).ok_or(Error::TokenNotFound)
        }

        fn batch_in_progress(token: &Token) -> bool {
            token.distribution_index > 0 || token.discharge_index > 0 || token.discharging
        }

        fn only_owner(&self) -> Result<(), Error> {
            if self.env().caller() != self.owner {
                return Err(Error::NotOwner);
            }
            Ok(())
        }

        fn assert_not_paused(&self) -> Result<(), Error> {
            if self.paused {
                return Err(Error::ContractPaused);
            }
            Ok(())
        }

        fn assert_participant(&self, account: AccountId) -> Result<(), Error> {
            if self.blacklist.get(account).unwrap_or(false)
                || self.opted_out.get(account).unwrap_or(false)
            {
                return Err(Error::Blacklisted);
            }
            Ok(())
        }

        // ── Coin ledger bridge ────────────────────────────────────────────
        //
        // With no ledger configured every call is mocked as successful
        // (devnet / off-chain testing), mirroring on-chain dispatch otherwise.

        fn coin_transfer_from(&self, from: AccountId, amount: Balance) -> bool {
            if amount == 0 {
                return true;
            }
            let ledger = match self.coin_ledger {
                Some(l) => l,
                None => return true,
            };
            let result = build_call::<DefaultEnvironment>()
                .call(ledger)
                .exec_input(
                    ExecutionInput::new(Selector::new(ink::selector_bytes!("transfer_from")))
                        .push_arg(from)
                        .push_arg(self.env().account_id())
                        .push_arg(amount),
                )
                .returns::<bool>()
                .try_invoke();
            matches!(result, Ok(Ok(true)))
        }

        fn coin_transfer(&self, to: AccountId, amount: Balance) -> bool {
            if amount == 0 {
                return true;
            }
            #[cfg(test)]
            if self.coin_transfers_fail {
                return false;
            }
            let ledger = match self.coin_ledger {
                Some(l) => l,
                None => return true,
            };
            let result = build_call::<DefaultEnvironment>()
                .call(ledger)
                .exec_input(
                    ExecutionInput::new(Selector::new(ink::selector_bytes!("transfer")))
                        .push_arg(to)
                        .push_arg(amount),
                )
                .returns::<bool>()
                .try_invoke();
            matches!(result, Ok(Ok(true)))
        }

        fn coin_balance_of(&self, account: AccountId) -> Balance {
            let ledger = match self.coin_ledger {
                Some(l) => l,
                None => return 0,
            };
            let result = build_call::<DefaultEnvironment>()
                .call(ledger)
                .exec_input(
                    ExecutionInput::new(Selector::new(ink::selector_bytes!("balance_of")))
                        .push_arg(account),
                )
                .returns::<Balance>()
                .try_invoke();
            match result {
                Ok(Ok(balance)) => balance,
                _ => 0,
            }
        }
    }

    // =========================================================================
    // UNIT TESTS
    // =========================================================================

}
