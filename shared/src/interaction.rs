use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{DecodeError, MinerResult},
    types::{Challenge, MinerKey, NonceRange},
};

pub const HANDSHAKE_TAG: u8 = 0x00;
pub const START_MINING_TAG: u8 = 0x00;
pub const SUBMISSION_RESULT_TAG: u8 = 0x01;

/// tag + pubkey + timestamp
pub const HANDSHAKE_LEN: usize = 1 + 32 + 8;
/// tag + challenge + cutoff + nonce start
pub const START_MINING_MIN_LEN: usize = 1 + 32 + 8 + 8;
pub const START_MINING_LEN: usize = START_MINING_MIN_LEN + 8;

/// client -> pool, sent once per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub pubkey: MinerKey,
    pub timestamp: u64,
}

impl Handshake {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(HANDSHAKE_TAG);
        buf.put_slice(self.pubkey.as_bytes());
        buf.put_u64_le(self.timestamp);
        buf.freeze()
    }
}

/// pool -> client, a new proof-of-work round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartMining {
    pub challenge: Challenge,
    /// seconds the workers may search
    pub cutoff: u64,
    pub nonce_start: u64,
    pub nonce_end: u64,
}

impl StartMining {
    pub fn range(&self) -> MinerResult<NonceRange> {
        NonceRange::new(self.nonce_start, self.nonce_end)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(START_MINING_LEN);
        buf.put_u8(START_MINING_TAG);
        buf.put_slice(&self.challenge);
        buf.put_u64_le(self.cutoff);
        buf.put_u64_le(self.nonce_start);
        buf.put_u64_le(self.nonce_end);
        buf.freeze()
    }

    fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        if frame.len() < START_MINING_MIN_LEN {
            return Err(DecodeError::TooShort(frame.len(), START_MINING_MIN_LEN));
        }

        let mut buf = &frame[1..];
        let mut challenge = [0u8; 32];
        buf.copy_to_slice(&mut challenge);
        let cutoff = buf.get_u64_le();
        let nonce_start = buf.get_u64_le();

        // the end bound may be truncated; missing high bytes read as zero
        let mut end = [0u8; 8];
        let present = buf.remaining().min(8);
        end[..present].copy_from_slice(&buf[..present]);
        let nonce_end = u64::from_le_bytes(end);

        Ok(Self { challenge, cutoff, nonce_start, nonce_end })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardDetails {
    pub total_balance: f64,
    pub total_rewards: f64,
    pub miner_supplied_difficulty: u32,
    pub miner_earned_rewards: f64,
    pub miner_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostRewardDetails {
    pub mint: [u8; 32],
    pub total_rewards: f64,
    pub miner_earned_rewards: f64,
    pub miner_percentage: f64,
}

/// pool -> client, broadcast after a submission window closes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSubmissionResult {
    pub difficulty: u32,
    pub challenge: Challenge,
    pub best_nonce: u64,
    pub active_miners: u64,
    pub reward_details: RewardDetails,
    #[serde(default)]
    pub boost_reward_details: Vec<BoostRewardDetails>,
}

impl PoolSubmissionResult {
    pub fn encode(&self) -> serde_json::Result<Bytes> {
        let mut buf = BytesMut::new();
        buf.put_u8(SUBMISSION_RESULT_TAG);
        buf.put_slice(serde_json::to_string(self)?.as_bytes());
        Ok(buf.freeze())
    }

    fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(payload)?;
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    StartMining(StartMining),
    PoolSubmissionResult(PoolSubmissionResult),
}

impl TryFrom<&[u8]> for ServerMessage {
    type Error = DecodeError;

    fn try_from(frame: &[u8]) -> Result<Self, Self::Error> {
        match frame.first() {
            None => Err(DecodeError::Empty),
            Some(&START_MINING_TAG) => StartMining::decode(frame).map(ServerMessage::StartMining),
            Some(&SUBMISSION_RESULT_TAG) => {
                PoolSubmissionResult::decode(&frame[1..]).map(ServerMessage::PoolSubmissionResult)
            }
            Some(&tag) => Err(DecodeError::UnknownTag(tag)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequential_challenge() -> Challenge {
        let mut challenge = [0u8; 32];
        for (i, byte) in challenge.iter_mut().enumerate() {
            *byte = i as u8 + 1;
        }
        challenge
    }

    #[test]
    fn handshake_layout() {
        let frame = Handshake { pubkey: MinerKey([0xab; 32]), timestamp: 1_700_000_000 }.encode();
        assert_eq!(frame.len(), HANDSHAKE_LEN);
        assert_eq!(frame[0], HANDSHAKE_TAG);
        assert!(frame[1..33].iter().all(|b| *b == 0xab));
        assert_eq!(&frame[33..41], &1_700_000_000u64.to_le_bytes());
    }

    #[test]
    fn start_mining_too_short_is_an_error() {
        for len in [1, 33, 41, START_MINING_MIN_LEN - 1] {
            let frame = vec![START_MINING_TAG; len];
            match ServerMessage::try_from(frame.as_slice()) {
                Err(DecodeError::TooShort(got, need)) => {
                    assert_eq!(got, len);
                    assert_eq!(need, START_MINING_MIN_LEN);
                }
                other => panic!("unexpected decode result: {other:?}"),
            }
        }
    }

    #[test]
    fn start_mining_minimum_frame_decodes_exactly() {
        let mut frame = vec![START_MINING_TAG];
        frame.extend_from_slice(&sequential_challenge());
        frame.extend_from_slice(&60u64.to_le_bytes());
        frame.extend_from_slice(&0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(frame.len(), START_MINING_MIN_LEN);

        let ServerMessage::StartMining(work) = ServerMessage::try_from(frame.as_slice()).unwrap()
        else {
            panic!("expected start mining");
        };
        assert_eq!(work.challenge, sequential_challenge());
        assert_eq!(work.cutoff, 60);
        assert_eq!(work.nonce_start, 0x0102_0304_0506_0708);
        assert_eq!(work.nonce_end, 0);
    }

    #[test]
    fn start_mining_full_frame_decodes_exactly() {
        let mut frame = vec![START_MINING_TAG];
        frame.extend_from_slice(&sequential_challenge());
        frame.extend_from_slice(&60u64.to_le_bytes());
        frame.extend_from_slice(&0u64.to_le_bytes());
        frame.extend_from_slice(&99u64.to_le_bytes());

        let message = ServerMessage::try_from(frame.as_slice()).unwrap();
        assert_eq!(
            message,
            ServerMessage::StartMining(StartMining {
                challenge: sequential_challenge(),
                cutoff: 60,
                nonce_start: 0,
                nonce_end: 99,
            })
        );
    }

    #[test]
    fn start_mining_partial_end_bound_is_zero_filled() {
        let mut frame = vec![START_MINING_TAG];
        frame.extend_from_slice(&[0u8; 32]);
        frame.extend_from_slice(&1u64.to_le_bytes());
        frame.extend_from_slice(&2u64.to_le_bytes());
        frame.extend_from_slice(&[0x34, 0x12]);

        let ServerMessage::StartMining(work) = ServerMessage::try_from(frame.as_slice()).unwrap()
        else {
            panic!("expected start mining");
        };
        assert_eq!(work.nonce_end, 0x1234);
    }

    #[test]
    fn unknown_tag_and_empty_frame_are_errors() {
        assert!(matches!(ServerMessage::try_from(&[0x07u8, 1, 2][..]), Err(DecodeError::UnknownTag(7))));
        assert!(matches!(ServerMessage::try_from(&[0u8; 0][..]), Err(DecodeError::Empty)));
    }

    #[test]
    fn submission_result_reconstructs_byte_arrays_and_wide_integers() {
        let challenge = sequential_challenge();
        let json = serde_json::json!({
            "difficulty": 23,
            "challenge": challenge.to_vec(),
            "best_nonce": u64::MAX - 1,
            "active_miners": 412,
            "reward_details": {
                "total_balance": 12.5,
                "total_rewards": 0.25,
                "miner_supplied_difficulty": 19,
                "miner_earned_rewards": 0.0012,
                "miner_percentage": 0.48
            },
            "boost_reward_details": [{
                "mint": vec![9u8; 32],
                "total_rewards": 1.0,
                "miner_earned_rewards": 0.01,
                "miner_percentage": 1.0
            }]
        });
        let mut frame = vec![SUBMISSION_RESULT_TAG];
        frame.extend_from_slice(json.to_string().as_bytes());

        let ServerMessage::PoolSubmissionResult(result) =
            ServerMessage::try_from(frame.as_slice()).unwrap()
        else {
            panic!("expected submission result");
        };
        assert_eq!(result.challenge, challenge);
        assert_eq!(result.best_nonce, u64::MAX - 1);
        assert_eq!(result.active_miners, 412);
        assert_eq!(result.reward_details.miner_supplied_difficulty, 19);
        assert_eq!(result.boost_reward_details[0].mint, [9u8; 32]);

        let encoded = result.encode().unwrap();
        assert_eq!(
            ServerMessage::try_from(&encoded[..]).unwrap(),
            ServerMessage::PoolSubmissionResult(result)
        );
    }

    #[test]
    fn submission_result_with_short_challenge_is_rejected() {
        let json = serde_json::json!({
            "difficulty": 1,
            "challenge": [1, 2, 3],
            "best_nonce": 0,
            "active_miners": 1,
            "reward_details": {
                "total_balance": 0.0,
                "total_rewards": 0.0,
                "miner_supplied_difficulty": 0,
                "miner_earned_rewards": 0.0,
                "miner_percentage": 0.0
            }
        });
        let mut frame = vec![SUBMISSION_RESULT_TAG];
        frame.extend_from_slice(json.to_string().as_bytes());
        assert!(matches!(ServerMessage::try_from(frame.as_slice()), Err(DecodeError::Json(_))));

        assert!(matches!(
            ServerMessage::try_from(&[SUBMISSION_RESULT_TAG, 0xff, 0xfe][..]),
            Err(DecodeError::Utf8(_))
        ));
    }
}
