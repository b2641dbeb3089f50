//! Contract Definitions
//!
//! Solidity interfaces used by the relay, defined with alloy's `sol!`
//! macro. `#[sol(rpc)]` generates instance types callable through any
//! alloy Provider.
//!
//! Created: 2026-10-19

use alloy::sol;

// ── ERC20 ─────────────────────────────────────────────────────────────

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}
