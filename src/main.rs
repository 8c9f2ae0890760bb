//! P2P Lending - demo binary.
//!
//! Walks one market through a supply / borrow / accrue / repay / withdraw
//! cycle and prints balances and the resulting state root. Log verbosity is
//! controlled with `RUST_LOG` (e.g. `RUST_LOG=p2p_lending=debug`).

use std::error::Error;

use p2p_lending::math::decimal::{from_ray, from_units_trimmed, to_units, WAD_DECIMALS};
use p2p_lending::protocol::{FixedRatePool, Protocol};
use p2p_lending::{Address, Settings};
use primitive_types::U256;

const DAY: u64 = 24 * 60 * 60;

fn units(amount: &str) -> Result<U256, Box<dyn Error>> {
    to_units(amount, WAD_DECIMALS).ok_or_else(|| format!("invalid amount {amount}").into())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = Settings::load()?;
    let config = settings.market.market_config()?;
    let rates = settings.pool.rates()?;

    let dai = Address::from_low_u64(0xDA1);
    let alice = Address::from_low_u64(0xA11CE);
    let bob = Address::from_low_u64(0xB0B);
    let carol = Address::from_low_u64(0xCA201);

    let mut protocol = Protocol::new(FixedRatePool::with_rates(rates));
    protocol.create_market(dai, config, 0)?;

    println!("===========================================");
    println!("  P2P Lending - matching overlay demo");
    println!("===========================================");
    println!();

    let receipt = protocol.supply(dai, alice, units("1000")?, 4, 0)?;
    println!("alice supplies 1000: pool {}", from_units_trimmed(receipt.pool, WAD_DECIMALS));

    let receipt = protocol.borrow(dai, bob, units("600")?, 4, DAY)?;
    println!(
        "bob borrows 600: p2p {} pool {}",
        from_units_trimmed(receipt.p2p(), WAD_DECIMALS),
        from_units_trimmed(receipt.pool, WAD_DECIMALS)
    );

    let receipt = protocol.borrow(dai, carol, units("700")?, 4, 2 * DAY)?;
    println!(
        "carol borrows 700: p2p {} pool {}",
        from_units_trimmed(receipt.p2p(), WAD_DECIMALS),
        from_units_trimmed(receipt.pool, WAD_DECIMALS)
    );

    let indexes = protocol.update_indexes(dai, 30 * DAY)?;
    println!();
    println!("after 30 days:");
    println!("  supply pool index {}  p2p index {}", from_ray(indexes.supply.pool_index), from_ray(indexes.supply.p2p_index));
    println!("  borrow pool index {}  p2p index {}", from_ray(indexes.borrow.pool_index), from_ray(indexes.borrow.p2p_index));

    let receipt = protocol.repay(dai, bob, units("10000")?, None, 30 * DAY)?;
    println!();
    println!(
        "bob repays everything ({}): reserve {} promoted {} demoted {} new delta {}",
        from_units_trimmed(receipt.amount, WAD_DECIMALS),
        from_units_trimmed(receipt.reserve, WAD_DECIMALS),
        from_units_trimmed(receipt.promoted, WAD_DECIMALS),
        from_units_trimmed(receipt.demoted, WAD_DECIMALS),
        from_units_trimmed(receipt.to_delta, WAD_DECIMALS)
    );

    let alice_supply = protocol.view(dai, |m| m.supply_balance(&alice))??;
    println!("alice supply balance {}", from_units_trimmed(alice_supply, WAD_DECIMALS));

    let receipt = protocol.withdraw(dai, alice, alice_supply, None, 31 * DAY)?;
    println!("alice withdraws {}", from_units_trimmed(receipt.amount, WAD_DECIMALS));

    protocol.verify_invariants(U256::from(1_000_000u64))?;
    println!();
    println!("state root: 0x{}", protocol.state_root_hex()?);
    Ok(())
}
