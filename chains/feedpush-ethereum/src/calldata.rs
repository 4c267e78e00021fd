use ethers::abi::{encode, Token};
use feedpush_core::{Batch, Bytes, UpdateCall};

/// `performUpkeep(bytes)`, the usual update entrypoint.
pub const PERFORM_UPKEEP_SELECTOR: [u8; 4] = [0x45, 0x85, 0xe3, 0x3b];

/// Payload handed to the update entrypoint: the abi encoded `bytes[]` of the
/// batch's signed reports, in batch order.
pub fn encode_perform_data(batch: &Batch) -> Bytes {
    let reports = batch
        .updates
        .iter()
        .map(|update| Token::Bytes(update.report.payload.to_vec()))
        .collect();
    encode(&[Token::Array(reports)]).into()
}

/// Call updating every feed of `batch` through its configured selector,
/// which takes the perform data as its single `bytes` argument.
pub fn encode_update_call(batch: &Batch) -> UpdateCall {
    let arguments = encode(&[Token::Bytes(encode_perform_data(batch).to_vec())]);
    let mut data = Vec::with_capacity(4 + arguments.len());
    data.extend_from_slice(&batch.selector);
    data.extend_from_slice(&arguments);
    UpdateCall::new(batch.target, data.into())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ethers::abi::{decode, ParamType};
    use ethers::contract::EthCall;
    use feedpush_core::{
        Address, DueUpdate, Feed, FeedId, FeedRecord, SourceReport, UpdateReason,
    };

    use super::*;
    use crate::contracts::PerformUpkeepCall;

    fn update(id: u8, payload: Vec<u8>) -> DueUpdate {
        let feed = Feed::new(
            FeedId::from([id; 32]),
            format!("FEED{id}"),
            Duration::from_secs(60),
            10_000,
            None,
        )
        .unwrap();
        let record = FeedRecord::new(feed.id, 1, 1_000, 1_000);
        DueUpdate::new(feed, UpdateReason::Deviation, SourceReport::new(record, payload.into()))
    }

    fn batch(updates: Vec<DueUpdate>) -> Batch {
        Batch {
            id: "main".into(),
            target: Address::repeat_byte(0x11),
            selector: PERFORM_UPKEEP_SELECTOR,
            updates,
        }
    }

    #[test]
    fn selector_matches_perform_upkeep() {
        assert_eq!(PerformUpkeepCall::selector(), PERFORM_UPKEEP_SELECTOR);
    }

    #[test]
    fn reports_are_forwarded_in_batch_order() {
        let batch = batch(vec![update(1, vec![0xaa; 3]), update(2, vec![0xbb; 40])]);
        let call = encode_update_call(&batch);

        assert_eq!(call.target, Address::repeat_byte(0x11));
        assert_eq!(&call.data[..4], &PERFORM_UPKEEP_SELECTOR);

        let outer = decode(&[ParamType::Bytes], &call.data[4..]).unwrap();
        let perform_data = outer[0].clone().into_bytes().unwrap();
        let inner = decode(
            &[ParamType::Array(Box::new(ParamType::Bytes))],
            &perform_data,
        )
        .unwrap();
        let reports: Vec<Vec<u8>> = inner[0]
            .clone()
            .into_array()
            .unwrap()
            .into_iter()
            .map(|t| t.into_bytes().unwrap())
            .collect();
        assert_eq!(reports, vec![vec![0xaa; 3], vec![0xbb; 40]]);
    }

    #[test]
    fn matches_the_generated_binding() {
        let batch = batch(vec![update(7, vec![1, 2, 3, 4])]);
        let expected = ethers::abi::AbiEncode::encode(PerformUpkeepCall {
            perform_data: encode_perform_data(&batch),
        });
        assert_eq!(encode_update_call(&batch).data.to_vec(), expected);
    }
}
