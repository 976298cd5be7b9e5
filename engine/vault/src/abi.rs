//! Contract interfaces consumed by the engine.

use alloy::sol;

sol! {
    /// Native-currency vault tracking a plain balance per depositor.
    #[sol(rpc)]
    interface INativeVault {
        event Deposit(address indexed user, uint256 amount);
        event Withdraw(address indexed user, uint256 amount);

        function deposit() external payable;
        function withdraw(uint256 amount) external;
        function balances(address user) external view returns (uint256);
    }
}

sol! {
    /// ERC-4626 vault over an ERC-20 asset.
    #[sol(rpc)]
    interface IShareVault {
        event Deposit(address indexed caller, address indexed owner, uint256 assets, uint256 shares);
        event Withdraw(address indexed caller, address indexed receiver, address indexed owner, uint256 assets, uint256 shares);

        function balanceOf(address owner) external view returns (uint256);
        function decimals() external view returns (uint8);
        function convertToAssets(uint256 shares) external view returns (uint256 assets);
        function convertToShares(uint256 assets) external view returns (uint256 shares);

        function deposit(uint256 assets, address receiver) external returns (uint256 shares);
        function withdraw(uint256 assets, address receiver, address owner) external returns (uint256 shares);
        function redeem(uint256 shares, address receiver, address owner) external returns (uint256 assets);
    }
}

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

sol! {
    /// Test-token faucet.
    #[sol(rpc)]
    interface IFaucet {
        function requestTokens(address token) external;
    }
}
