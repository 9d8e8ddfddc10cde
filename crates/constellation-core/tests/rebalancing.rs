//! Keeper passes: stake rebalancing, vault top-ups and reward sweeps.

use constellation_core::{
    address::{AddressPredictor, FactoryParams},
    directory::Directory,
    distributor::{Distributor, DistributorBalances},
    oracle::ManualPriceOracle,
    registry::InMemoryValidatorRegistry,
    rewards::{RewardLedger, RewardSplitter},
    stake_rebalancer::{CollateralState, StakeAction, StakeRebalancer},
    vault::{VaultLiquidityRebalancer, VaultSnapshot},
    whitelist::OperatorWhitelist,
    Address, AdmissionController, Amount, ConstellationError, Hash32, ProtocolConfig, Role,
    Timestamp, Wad,
};

const NOW: Timestamp = 1_750_000_000;

type Controller = AdmissionController<OperatorWhitelist, InMemoryValidatorRegistry>;

struct Keeper {
    controller: Controller,
    config: ProtocolConfig,
    admin: Address,
    keeper: Address,
}

fn setup(balances: DistributorBalances) -> Keeper {
    let admin = Address([0xaa; 20]);
    let keeper = Address([0xbb; 20]);
    let mut directory = Directory::new(admin);
    directory
        .grant_role(&admin, keeper, Role::Protocol)
        .expect("grant protocol");

    let params = FactoryParams {
        proxy_factory: Address([0x10; 20]),
        proxy_init_code_hash: Hash32([0x20; 32]),
        validator_factory: Address([0x30; 20]),
        validator_init_code_hash: Hash32([0x40; 32]),
    };
    let config = ProtocolConfig::builder()
        .admin_check(false)
        .oracle_max_age_secs(3_600)
        .build()
        .expect("config");
    let controller = AdmissionController::new(
        &config,
        directory,
        AddressPredictor::new(params.clone()),
        Distributor::with_balances(Address([0xd0; 20]), balances),
        OperatorWhitelist::new(),
        InMemoryValidatorRegistry::new(params),
    )
    .expect("controller");
    Keeper {
        controller,
        config,
        admin,
        keeper,
    }
}

fn stake_rebalancer(config: &ProtocolConfig) -> StakeRebalancer {
    StakeRebalancer::from_config(config).expect("stake rebalancer")
}

fn vault_rebalancer(config: &ProtocolConfig) -> VaultLiquidityRebalancer {
    VaultLiquidityRebalancer::from_config(config).expect("vault rebalancer")
}

#[test]
fn stake_pass_is_bounded_by_distributor_rpl() {
    let mut k = setup(DistributorBalances {
        rpl: Amount::ether(300),
        ..Default::default()
    });
    let rebalancer = stake_rebalancer(&k.config);
    let oracle = ManualPriceOracle::new(Wad::from_percent(1), NOW);
    // 100 ETH matched at 15% and 0.01 ETH/RPL needs 1500 RPL.
    let state = CollateralState {
        existing_collateral: Amount::ether(1_000),
        matched_principal: Amount::ether(100),
    };

    let keeper = k.keeper;
    let action = k
        .controller
        .rebalance_stake(&keeper, &rebalancer, &state, &oracle, NOW)
        .expect("stake pass");
    assert_eq!(action, StakeAction::Stake(Amount::ether(300)));
    assert!(k.controller.distributor().balances().rpl.is_zero());

    let action = k
        .controller
        .rebalance_stake(&keeper, &rebalancer, &state, &oracle, NOW)
        .expect("second pass");
    assert_eq!(action, StakeAction::Noop);
    assert_eq!(k.controller.metrics().stake_actions.get(), 1);
}

#[test]
fn stale_oracle_blocks_stake_pass() {
    let mut k = setup(DistributorBalances {
        rpl: Amount::ether(10),
        ..Default::default()
    });
    let rebalancer = stake_rebalancer(&k.config);
    let oracle = ManualPriceOracle::new(Wad::from_percent(1), NOW - 3_601);
    let state = CollateralState {
        existing_collateral: Amount::ZERO,
        matched_principal: Amount::ether(1),
    };
    let keeper = k.keeper;
    assert!(matches!(
        k.controller
            .rebalance_stake(&keeper, &rebalancer, &state, &oracle, NOW),
        Err(ConstellationError::StaleOracle { .. })
    ));
    assert_eq!(k.controller.distributor().balances().rpl, Amount::ether(10));
}

#[test]
fn collateral_ratios_are_admin_only() {
    let k = setup(DistributorBalances::default());
    let mut rebalancer = stake_rebalancer(&k.config);
    assert!(matches!(
        k.controller.set_collateral_ratios(
            &k.keeper,
            &mut rebalancer,
            Wad::from_percent(20),
            Wad::from_percent(10)
        ),
        Err(ConstellationError::Unauthorized { .. })
    ));
    k.controller
        .set_collateral_ratios(
            &k.admin,
            &mut rebalancer,
            Wad::from_percent(20),
            Wad::from_percent(10),
        )
        .expect("admin sets ratios");
    assert_eq!(rebalancer.target_ratio(), Wad::from_percent(20));
}

#[test]
fn vault_top_up_saturates_at_available_liquidity() {
    let mut k = setup(DistributorBalances {
        native_eth: Amount::new(3),
        ..Default::default()
    });
    let rebalancer = VaultLiquidityRebalancer::new(
        Wad::from_percent(10),
        Wad::from_percent(10),
        Wad::from_percent(10),
        3_600,
    )
    .expect("vault rebalancer");
    // Reserve target 10 of 100, nothing liquid: 10 required.
    let eth_vault = VaultSnapshot {
        total_assets: Amount::new(100),
        liquid_assets: Amount::ZERO,
    };
    let rpl_vault = VaultSnapshot::default();

    let keeper = k.keeper;
    let plan = k
        .controller
        .rebalance_vaults(&keeper, &rebalancer, &eth_vault, &rpl_vault)
        .expect("first pass");
    assert_eq!(plan.eth_top_up, Amount::new(3));
    assert_eq!(plan.eth_to_wrap, Amount::new(3));

    let plan = k
        .controller
        .rebalance_vaults(&keeper, &rebalancer, &eth_vault, &rpl_vault)
        .expect("second pass");
    assert_eq!(plan.eth_top_up, Amount::ZERO);
    assert_eq!(k.controller.metrics().vault_top_ups.get(), 1);

    let admin = k.admin;
    assert!(k
        .controller
        .rebalance_vaults(&admin, &rebalancer, &eth_vault, &rpl_vault)
        .is_err());
}

#[test]
fn principal_deposit_limit_tracks_collateral() {
    let k = setup(DistributorBalances::default());
    let rebalancer = vault_rebalancer(&k.config);
    let oracle_reading = constellation_core::oracle::OracleReading {
        price: Wad::from_percent(2),
        updated_at: NOW,
    };
    // 500 RPL * 0.02 = 10 ETH covers 100 ETH of principal at 10%.
    let limit = rebalancer
        .principal_deposit_limit(Amount::ether(30), Amount::ether(500), &oracle_reading, NOW)
        .expect("limit");
    assert_eq!(limit, Amount::ether(70));
}

#[test]
fn reward_sweep_feeds_distributor_liquidity() {
    let mut k = setup(DistributorBalances::default());
    let splitter = RewardSplitter::from_config(&k.config).expect("splitter");
    let mut rebalancer = stake_rebalancer(&k.config);
    let mut ledger = RewardLedger::default();

    let keeper = k.keeper;
    let shares = k
        .controller
        .sweep_rewards(&keeper, &splitter, &mut rebalancer, Amount::ether(2), &mut ledger, NOW)
        .expect("sweep");
    let total = shares
        .treasury
        .checked_add(shares.operators)
        .and_then(|s| s.checked_add(shares.vault))
        .unwrap();
    assert_eq!(total, Amount::ether(2));
    assert_eq!(
        k.controller.distributor().available_principal().unwrap(),
        shares.vault
    );
    assert_eq!(ledger.vault_accrued_principal, shares.vault);

    let admin = k.admin;
    assert!(matches!(
        k.controller.sweep_rewards(
            &admin,
            &splitter,
            &mut rebalancer,
            Amount::ether(1),
            &mut ledger,
            NOW + 1
        ),
        Err(ConstellationError::Unauthorized { .. })
    ));
    assert_eq!(rebalancer.last_claim_at(), Some(NOW));
}

#[test]
fn surplus_stays_staked_until_a_claim_interval_passes() {
    let mut k = setup(DistributorBalances::default());
    let splitter = RewardSplitter::from_config(&k.config).expect("splitter");
    let mut rebalancer = stake_rebalancer(&k.config);
    let mut ledger = RewardLedger::default();
    let interval = k.config.collateral.claim_interval_secs;
    // 2000 RPL staked against 1500 required: 500 surplus.
    let state = CollateralState {
        existing_collateral: Amount::ether(2_000),
        matched_principal: Amount::ether(100),
    };

    let keeper = k.keeper;
    k.controller
        .sweep_rewards(&keeper, &splitter, &mut rebalancer, Amount::ether(1), &mut ledger, NOW)
        .expect("sweep");

    let oracle = ManualPriceOracle::new(Wad::from_percent(1), NOW);
    let action = k
        .controller
        .rebalance_stake(&keeper, &rebalancer, &state, &oracle, NOW)
        .expect("pass right after claim");
    assert_eq!(action, StakeAction::Noop);
    assert!(k.controller.distributor().balances().rpl.is_zero());

    let later = NOW + interval;
    let oracle = ManualPriceOracle::new(Wad::from_percent(1), later);
    let action = k
        .controller
        .rebalance_stake(&keeper, &rebalancer, &state, &oracle, later)
        .expect("pass after interval");
    assert_eq!(action, StakeAction::Unstake(Amount::ether(500)));
    assert_eq!(k.controller.distributor().balances().rpl, Amount::ether(500));
    assert_eq!(k.controller.metrics().unstake_actions.get(), 1);
}
