//! Validator admission controller.
//!
//! One admission runs as a unit of work:
//!
//! ```text
//! Idle -> SignatureChecked -> NonceConsumed -> LiquidityConfirmed -> EscrowCreated -> Forwarded
//!   \__________________________ Rejected(tag) ___________________________________/
//! ```
//!
//! Every read-only gate (eligibility, exact value, address prediction, duplicate target,
//! signature, replay, liquidity) runs before the first mutation. Mutations are then
//! applied one at a time, each pushing an undo entry; the registry deploy is the final
//! step, and if it fails the undo log is replayed in reverse so no partial admission
//! survives.
//!
//! The controller is also the role-gated entry point for administration and for the
//! keeper passes that move distributor funds.

use crate::address::{AddressPredictor, Create2Formula, DerivationFormula, PredictedAddresses};
use crate::config::ProtocolConfig;
use crate::directory::{Directory, Role};
use crate::distributor::{BondDebit, Distributor};
use crate::escrow::{EscrowLedger, ReleaseAuthorization};
use crate::metrics::AdmissionMetrics;
use crate::nonce::NonceRegistry;
use crate::oracle::PriceOracle;
use crate::registry::{DeploymentRequest, ValidatorRegistry};
use crate::rewards::{RewardLedger, RewardShares, RewardSplitter};
use crate::signature::{AdmissionPayload, SignatureVerifier};
use crate::stake_rebalancer::{CollateralState, StakeAction, StakeRebalancer};
use crate::vault::{LiquidityPlan, VaultLiquidityRebalancer, VaultSnapshot};
use crate::whitelist::EligibilityRegistry;
use crate::{Address, Amount, ConstellationError, Result, Timestamp, Wad};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionStage {
    Idle,
    SignatureChecked,
    NonceConsumed,
    LiquidityConfirmed,
    EscrowCreated,
    Forwarded,
    /// First failure, by error tag.
    Rejected(&'static str),
}

/// Request submitted by a prospective operator. The chain id, requester and required
/// value covered by the signature are supplied by the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdmissionRequest {
    pub requester_salt: u128,
    pub key_material: Vec<u8>,
    pub target_address: Address,
    pub epoch: u64,
    pub nonce: u64,
    pub signed_at: Timestamp,
    /// `signer_public_key(32) || ed25519_signature(64)`.
    pub signature: Vec<u8>,
}

impl AdmissionRequest {
    /// The payload the admission server is expected to have signed.
    pub fn payload(&self, chain_id: u64, requester: Address, required_value: Amount) -> AdmissionPayload {
        AdmissionPayload {
            chain_id,
            requester,
            requester_salt: self.requester_salt,
            target_address: self.target_address,
            required_value,
            epoch: self.epoch,
            nonce: self.nonce,
            signed_at: self.signed_at,
            key_material: self.key_material.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmissionReceipt {
    pub validator: Address,
    pub proxy: Address,
    pub locked: Amount,
    pub bond: Amount,
    pub nonce: u64,
}

/// Gates passed by a request, carried from the read-only phase into commit.
struct Preflight {
    payload: AdmissionPayload,
    predicted: PredictedAddresses,
}

enum Undo {
    Nonce { requester: Address, nonce: u64 },
    Bond(BondDebit),
    Escrow(Address),
    Admitted(Address),
}

#[derive(Default)]
struct UnitOfWork {
    undo: Vec<Undo>,
}

pub struct AdmissionController<W, R, F = Create2Formula> {
    chain_id: u64,
    lock_threshold: Amount,
    bond_amount: Amount,
    max_signature_age_secs: u64,
    max_future_skew_secs: u64,
    trusted_signer: Option<Address>,
    directory: Directory,
    verifier: SignatureVerifier,
    nonces: NonceRegistry,
    predictor: AddressPredictor<F>,
    escrow: EscrowLedger,
    distributor: Distributor,
    whitelist: W,
    registry: R,
    exited: HashSet<Address>,
    last_stage: AdmissionStage,
    metrics: AdmissionMetrics,
}

impl<W, R, F> AdmissionController<W, R, F>
where
    W: EligibilityRegistry,
    R: ValidatorRegistry,
    F: DerivationFormula,
{
    pub fn new(
        config: &ProtocolConfig,
        directory: Directory,
        predictor: AddressPredictor<F>,
        distributor: Distributor,
        whitelist: W,
        registry: R,
    ) -> Result<Self> {
        config.validate()?;
        let admission = &config.admission;
        let trusted_signer = config.trusted_signer()?.map(|key| key.address());
        Ok(Self {
            chain_id: admission.chain_id,
            lock_threshold: admission.lock_threshold,
            bond_amount: admission.bond_amount,
            max_signature_age_secs: admission.max_signature_age_secs,
            max_future_skew_secs: admission.max_future_skew_secs,
            trusted_signer,
            directory,
            verifier: SignatureVerifier::new(admission.admin_check),
            nonces: NonceRegistry::new(),
            predictor,
            escrow: EscrowLedger::new(),
            distributor,
            whitelist,
            registry,
            exited: HashSet::new(),
            last_stage: AdmissionStage::Idle,
            metrics: AdmissionMetrics::new(),
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn lock_threshold(&self) -> Amount {
        self.lock_threshold
    }

    pub fn bond_amount(&self) -> Amount {
        self.bond_amount
    }

    pub fn trusted_signer(&self) -> Option<Address> {
        self.trusted_signer
    }

    pub fn admin_check_enabled(&self) -> bool {
        self.verifier.admin_check_enabled()
    }

    pub fn last_stage(&self) -> AdmissionStage {
        self.last_stage
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Role changes still require the caller to hold `Admin`.
    pub fn directory_mut(&mut self) -> &mut Directory {
        &mut self.directory
    }

    pub fn nonces(&self) -> &NonceRegistry {
        &self.nonces
    }

    pub fn predictor(&self) -> &AddressPredictor<F> {
        &self.predictor
    }

    pub fn escrow(&self) -> &EscrowLedger {
        &self.escrow
    }

    pub fn distributor(&self) -> &Distributor {
        &self.distributor
    }

    pub fn whitelist(&self) -> &W {
        &self.whitelist
    }

    pub fn whitelist_mut(&mut self) -> &mut W {
        &mut self.whitelist
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }

    pub fn metrics(&self) -> &AdmissionMetrics {
        &self.metrics
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Run every admission gate without mutating anything.
    pub fn simulate(
        &self,
        requester: &Address,
        request: &AdmissionRequest,
        value: Amount,
        now: Timestamp,
    ) -> Result<PredictedAddresses> {
        self.metrics.simulations_total.inc();
        let mut stage = AdmissionStage::Idle;
        self.preflight(requester, request, value, now, &mut stage)
            .map(|checked| checked.predicted)
    }

    /// Admit a new validator for `requester`, locking `value` in escrow.
    #[instrument(skip_all, fields(requester = %requester, nonce = request.nonce))]
    pub fn admit(
        &mut self,
        requester: &Address,
        request: &AdmissionRequest,
        value: Amount,
        now: Timestamp,
    ) -> Result<AdmissionReceipt> {
        let mut stage = AdmissionStage::Idle;
        let result = match self.preflight(requester, request, value, now, &mut stage) {
            Ok(checked) => {
                let mut uow = UnitOfWork::default();
                let committed = self.commit(requester, &checked, value, &mut uow, &mut stage);
                if committed.is_err() {
                    self.roll_back(uow);
                }
                committed
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(receipt) => {
                self.last_stage = AdmissionStage::Forwarded;
                self.metrics.admissions_total.inc();
                self.metrics.active_escrows.set(self.escrow.active_count() as u64);
                info!(
                    validator = %receipt.validator,
                    locked = %receipt.locked,
                    bond = %receipt.bond,
                    "Validator admitted"
                );
            }
            Err(e) => {
                warn!(tag = e.tag(), ?stage, error = %e, "Admission rejected");
                self.last_stage = AdmissionStage::Rejected(e.tag());
                self.metrics.record_rejection(e.tag());
            }
        }
        result
    }

    fn preflight(
        &self,
        requester: &Address,
        request: &AdmissionRequest,
        value: Amount,
        now: Timestamp,
        stage: &mut AdmissionStage,
    ) -> Result<Preflight> {
        if !self.whitelist.is_eligible(requester) {
            return Err(ConstellationError::NotEligible {
                requester: *requester,
            });
        }
        let active = self.whitelist.active_count(requester);
        let max = self.whitelist.max_validators(requester);
        if active >= max {
            return Err(ConstellationError::CapacityExceeded {
                requester: *requester,
                active,
                max,
            });
        }

        if value != self.lock_threshold {
            return Err(ConstellationError::WrongValue {
                expected: self.lock_threshold,
                supplied: value,
            });
        }

        let predicted =
            self.predictor
                .predict(requester, request.requester_salt, &request.key_material);
        if request.target_address != predicted.validator {
            return Err(ConstellationError::AddressMismatch {
                expected: predicted.validator,
                supplied: request.target_address,
            });
        }
        let factory = self
            .registry
            .expected_address(&predicted.proxy, &predicted.deployment_salt);
        if factory != predicted.validator {
            return Err(ConstellationError::FactoryDrift {
                predicted: predicted.validator,
                factory,
            });
        }

        // Duplicates are reported as such whatever the signature says.
        if self.escrow.contains(&predicted.validator) {
            return Err(ConstellationError::DuplicateKey {
                key: predicted.validator,
            });
        }

        let payload = request.payload(self.chain_id, *requester, self.lock_threshold);
        let verified = match self.trusted_signer {
            Some(ref signer) => {
                self.verifier
                    .verify(&self.directory, &payload, &request.signature, signer)?
            }
            None if self.verifier.admin_check_enabled() => {
                return Err(ConstellationError::BadSignature(
                    "no trusted admission signer configured".into(),
                ));
            }
            None => self
                .verifier
                .verify(&self.directory, &payload, &request.signature, &Address::ZERO)?,
        };
        if verified.signer.is_some() {
            self.check_signature_age(payload.signed_at, now)?;
        }
        *stage = AdmissionStage::SignatureChecked;

        self.nonces
            .check(requester, payload.epoch, payload.nonce)?;

        let available = self.distributor.available_principal()?;
        if self.bond_amount > available {
            return Err(ConstellationError::InsufficientLiquidity {
                required: self.bond_amount,
                available,
            });
        }

        debug!(validator = %predicted.validator, "Admission preflight passed");
        Ok(Preflight { payload, predicted })
    }

    fn check_signature_age(&self, signed_at: Timestamp, now: Timestamp) -> Result<()> {
        if signed_at > now {
            let skew_secs = signed_at - now;
            if skew_secs > self.max_future_skew_secs {
                return Err(ConstellationError::SignatureFromFuture { skew_secs });
            }
        }
        if self.max_signature_age_secs > 0 {
            let age_secs = now.saturating_sub(signed_at);
            if age_secs > self.max_signature_age_secs {
                return Err(ConstellationError::SignatureExpired {
                    age_secs,
                    max_age_secs: self.max_signature_age_secs,
                });
            }
        }
        Ok(())
    }

    fn commit(
        &mut self,
        requester: &Address,
        checked: &Preflight,
        value: Amount,
        uow: &mut UnitOfWork,
        stage: &mut AdmissionStage,
    ) -> Result<AdmissionReceipt> {
        let payload = &checked.payload;
        let validator = checked.predicted.validator;

        self.nonces
            .consume(requester, payload.epoch, payload.nonce)?;
        uow.undo.push(Undo::Nonce {
            requester: *requester,
            nonce: payload.nonce,
        });
        *stage = AdmissionStage::NonceConsumed;

        let debit = self.distributor.debit_bond(self.bond_amount)?;
        uow.undo.push(Undo::Bond(debit));
        *stage = AdmissionStage::LiquidityConfirmed;

        self.escrow.create(validator, *requester, value)?;
        uow.undo.push(Undo::Escrow(validator));
        *stage = AdmissionStage::EscrowCreated;

        self.whitelist.record_admitted(requester)?;
        uow.undo.push(Undo::Admitted(*requester));

        let deposit = value.checked_add(self.bond_amount)?;
        let deployed = self.registry.deploy(&DeploymentRequest {
            owner: *requester,
            deployer: checked.predicted.proxy,
            deployment_salt: checked.predicted.deployment_salt,
            expected_address: validator,
            key_material: payload.key_material.clone(),
            deposit,
        })?;
        if deployed != validator {
            return Err(ConstellationError::FactoryDrift {
                predicted: validator,
                factory: deployed,
            });
        }
        *stage = AdmissionStage::Forwarded;

        self.escrow.check_invariants()?;
        Ok(AdmissionReceipt {
            validator,
            proxy: checked.predicted.proxy,
            locked: value,
            bond: self.bond_amount,
            nonce: payload.nonce,
        })
    }

    fn roll_back(&mut self, uow: UnitOfWork) {
        self.metrics.rollbacks_total.inc();
        for undo in uow.undo.into_iter().rev() {
            match undo {
                Undo::Nonce { requester, nonce } => self.nonces.rollback_consume(&requester, nonce),
                Undo::Bond(debit) => self.distributor.rollback_bond(&debit),
                Undo::Escrow(key) => self.escrow.rollback_create(&key),
                Undo::Admitted(requester) => {
                    if let Err(e) = self.whitelist.record_exited(&requester) {
                        warn!(%requester, error = %e, "Failed to roll back operator count");
                    }
                }
            }
        }
        debug!("Admission rolled back");
    }

    // =========================================================================
    // Escrow release
    // =========================================================================

    /// Validator confirmed its stake: the lock goes back to its owner.
    ///
    /// The caller settles the returned authorization with its own transfer.
    pub fn release_on_activation(&mut self, caller: &Address, key: &Address) -> Result<ReleaseAuthorization> {
        self.directory.require_role(caller, Role::Protocol)?;
        let owner = self
            .escrow
            .get(key)
            .ok_or(ConstellationError::NotFound { key: *key })?
            .owner;
        let auth = self.escrow.release(key, owner)?;
        self.metrics.escrow_returned.inc();
        self.metrics.active_escrows.set(self.escrow.active_count() as u64);
        info!(%key, %owner, amount = %auth.amount, "Escrow returned on activation");
        Ok(auth)
    }

    /// Validator dissolved before staking: the lock is forfeited to the distributor and
    /// the operator's slot is freed.
    ///
    /// Every fallible check runs before the escrow is released, so an error leaves the
    /// escrow, the distributor and the operator count untouched.
    pub fn release_on_dissolution(&mut self, caller: &Address, key: &Address) -> Result<Amount> {
        self.directory.require_role(caller, Role::Protocol)?;
        let record = *self
            .escrow
            .get(key)
            .ok_or(ConstellationError::NotFound { key: *key })?;
        if !record.active {
            return Err(ConstellationError::AlreadyReleased { key: *key });
        }
        self.distributor
            .balances()
            .native_eth
            .checked_add(record.locked_amount)?;

        self.mark_exited(key, &record.owner)?;
        let auth = match self.escrow.release(key, self.distributor.address()) {
            Ok(auth) => auth,
            Err(e) => {
                self.unmark_exited(key, &record.owner);
                return Err(e);
            }
        };
        auth.settle(&mut self.distributor)?;
        self.metrics.escrow_forfeited.inc();
        self.metrics.active_escrows.set(self.escrow.active_count() as u64);
        info!(%key, owner = %record.owner, amount = %auth.amount, "Escrow forfeited on dissolution");
        Ok(auth.amount)
    }

    /// Close an activated validator whose lock was already returned.
    pub fn close_validator(&mut self, caller: &Address, key: &Address) -> Result<()> {
        self.directory.require_role(caller, Role::Protocol)?;
        let record = self
            .escrow
            .get(key)
            .ok_or(ConstellationError::NotFound { key: *key })?;
        if record.active {
            return Err(ConstellationError::InvalidInput(format!(
                "validator {key} still holds its lock; dissolve it instead"
            )));
        }
        let owner = record.owner;
        self.mark_exited(key, &owner)?;
        info!(%key, %owner, "Validator closed");
        Ok(())
    }

    /// Free the operator's slot for `key`, at most once.
    fn mark_exited(&mut self, key: &Address, owner: &Address) -> Result<()> {
        if self.exited.contains(key) {
            return Err(ConstellationError::AlreadyReleased { key: *key });
        }
        self.whitelist.record_exited(owner)?;
        self.exited.insert(*key);
        Ok(())
    }

    fn unmark_exited(&mut self, key: &Address, owner: &Address) {
        self.exited.remove(key);
        if let Err(e) = self.whitelist.record_admitted(owner) {
            warn!(%key, %owner, error = %e, "Failed to restore operator count");
        }
    }

    // =========================================================================
    // Administration
    // =========================================================================

    pub fn set_admin_check(&mut self, caller: &Address, enabled: bool) -> Result<()> {
        self.directory.require_role(caller, Role::Admin)?;
        self.verifier.set_admin_check(enabled);
        info!(%caller, enabled, "Admin check toggled");
        Ok(())
    }

    pub fn set_trusted_signer(&mut self, caller: &Address, signer: Address) -> Result<()> {
        self.directory.require_role(caller, Role::Admin)?;
        self.trusted_signer = Some(signer);
        info!(%caller, %signer, "Trusted admission signer set");
        Ok(())
    }

    /// Changing the threshold also voids outstanding signatures, which cover the old value.
    pub fn set_lock_threshold(&mut self, caller: &Address, amount: Amount) -> Result<()> {
        self.directory.require_role(caller, Role::Admin)?;
        if amount.is_zero() {
            return Err(ConstellationError::InvalidInput("lock threshold must be positive".into()));
        }
        self.lock_threshold = amount;
        info!(%caller, %amount, "Lock threshold set");
        Ok(())
    }

    pub fn set_bond_amount(&mut self, caller: &Address, amount: Amount) -> Result<()> {
        self.directory.require_role(caller, Role::Admin)?;
        if amount.is_zero() {
            return Err(ConstellationError::InvalidInput("bond amount must be positive".into()));
        }
        self.bond_amount = amount;
        info!(%caller, %amount, "Bond amount set");
        Ok(())
    }

    pub fn set_collateral_ratios(
        &self,
        caller: &Address,
        rebalancer: &mut StakeRebalancer,
        target_ratio: Wad,
        minimum_ratio: Wad,
    ) -> Result<()> {
        self.directory.require_role(caller, Role::Admin)?;
        rebalancer.set_ratios(target_ratio, minimum_ratio)
    }

    pub fn invalidate_all_signatures(&mut self, caller: &Address) -> Result<u64> {
        self.directory.require_role(caller, Role::Admin)?;
        self.nonces.invalidate_all()
    }

    pub fn invalidate_signatures_for(&mut self, caller: &Address, requester: &Address) -> Result<u64> {
        self.directory.require_role(caller, Role::Admin)?;
        self.nonces.invalidate_one(requester)
    }

    // =========================================================================
    // Keeper passes
    // =========================================================================

    /// Top up both vaults from the distributor.
    pub fn rebalance_vaults(
        &mut self,
        caller: &Address,
        rebalancer: &VaultLiquidityRebalancer,
        eth_vault: &VaultSnapshot,
        rpl_vault: &VaultSnapshot,
    ) -> Result<LiquidityPlan> {
        self.directory.require_role(caller, Role::Protocol)?;
        let plan = rebalancer.rebalance(&mut self.distributor, eth_vault, rpl_vault)?;
        if !plan.is_empty() {
            self.metrics.vault_top_ups.inc();
        }
        Ok(plan)
    }

    /// Stake or unstake RPL held by the distributor toward the target ratio.
    ///
    /// Stake is bounded by the distributor's RPL balance. An unstake credits the
    /// returned RPL back to the distributor.
    pub fn rebalance_stake<O: PriceOracle + ?Sized>(
        &mut self,
        caller: &Address,
        rebalancer: &StakeRebalancer,
        state: &CollateralState,
        oracle: &O,
        now: Timestamp,
    ) -> Result<StakeAction> {
        self.directory.require_role(caller, Role::Protocol)?;
        let reading = oracle.latest()?;
        let available = self.distributor.balances().rpl;
        let action = rebalancer.rebalance(state, &reading, available, now)?;
        match action {
            StakeAction::Stake(amount) => {
                self.distributor.debit_rpl(amount)?;
                self.metrics.stake_actions.inc();
            }
            StakeAction::Unstake(amount) => {
                self.distributor.credit_rpl(amount)?;
                self.metrics.unstake_actions.inc();
            }
            StakeAction::Noop => {}
        }
        debug!(?action, "Stake rebalance pass");
        Ok(action)
    }

    /// Apportion rewards that arrived since the last sweep.
    ///
    /// A sweep is a reward claim: it restarts the rebalancer's claim interval, so surplus
    /// collateral stays staked until a full interval has passed.
    pub fn sweep_rewards(
        &mut self,
        caller: &Address,
        splitter: &RewardSplitter,
        rebalancer: &mut StakeRebalancer,
        amount: Amount,
        ledger: &mut RewardLedger,
        now: Timestamp,
    ) -> Result<RewardShares> {
        self.directory.require_role(caller, Role::Protocol)?;
        let shares = splitter.sweep_rewards(amount, ledger, &mut self.distributor)?;
        rebalancer.record_claim(now);
        self.metrics.reward_sweeps.inc();
        Ok(shares)
    }
}
