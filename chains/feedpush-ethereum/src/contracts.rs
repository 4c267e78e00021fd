#![allow(clippy::all)]
#![allow(missing_docs)]

use ethers::contract::abigen;

abigen!(
    FeedUpdater,
    r#"[
        function latestUpdate(bytes32 feedId) external view returns (int192 price, uint32 timestamp)
        function performUpkeep(bytes performData) external
    ]"#
);

abigen!(
    GasPriceOracle,
    r#"[
        function getL1Fee(bytes data) external view returns (uint256)
    ]"#
);
