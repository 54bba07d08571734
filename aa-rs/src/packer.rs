//! Pure byte-layout transform from [`UserOperation`] to [`PackedUserOperation`].

use crate::types::{PackedUserOperation, UserOperation};
use ethers::types::{Bytes, U256};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PackError {
    #[error("{field} = {value} does not fit in 128 bits")]
    ValueTooLarge { field: &'static str, value: U256 },
}

fn to_u128(field: &'static str, value: U256) -> Result<u128, PackError> {
    if value > U256::from(u128::MAX) {
        return Err(PackError::ValueTooLarge { field, value });
    }
    Ok(value.as_u128())
}

/// `leftPad(high, 16) || leftPad(low, 16)`.
pub fn pack_u128_pair(
    (high_field, high): (&'static str, U256),
    (low_field, low): (&'static str, U256),
) -> Result<[u8; 32], PackError> {
    let mut word = [0u8; 32];
    word[..16].copy_from_slice(&to_u128(high_field, high)?.to_be_bytes());
    word[16..].copy_from_slice(&to_u128(low_field, low)?.to_be_bytes());
    Ok(word)
}

#[cfg(test)]
pub fn unpack_u128_pair(word: &[u8; 32]) -> (u128, u128) {
    let mut high = [0u8; 16];
    let mut low = [0u8; 16];
    high.copy_from_slice(&word[..16]);
    low.copy_from_slice(&word[16..]);
    (u128::from_be_bytes(high), u128::from_be_bytes(low))
}

/// Length of `paymaster(20) || verificationGasLimit(16) || postOpGasLimit(16)`.
pub const PAYMASTER_DATA_OFFSET: usize = 52;

impl UserOperation {
    /// `factory(20) || factoryData`, or empty when no factory is set.
    ///
    /// A zero factory address is packed literally; the builder never sets one
    /// for deployed wallets.
    pub fn init_code(&self) -> Bytes {
        match self.factory {
            Some(factory) => {
                let mut v = Vec::with_capacity(20 + self.factory_data.len());
                v.extend_from_slice(factory.as_bytes());
                v.extend_from_slice(self.factory_data.as_ref());
                Bytes::from(v)
            }
            None => Bytes::default(),
        }
    }

    /// `paymaster(20) || pmVerificationGasLimit(16) || pmPostOpGasLimit(16) || paymasterData`.
    ///
    /// Without a (non-zero) paymaster this is the empty byte string, never 52 zero bytes.
    pub fn paymaster_and_data(&self) -> Result<Bytes, PackError> {
        let Some(paymaster) = self.active_paymaster() else {
            return Ok(Bytes::default());
        };
        let limits = pack_u128_pair(
            (
                "paymasterVerificationGasLimit",
                self.paymaster_verification_gas_limit,
            ),
            ("paymasterPostOpGasLimit", self.paymaster_post_op_gas_limit),
        )?;
        let mut v = Vec::with_capacity(PAYMASTER_DATA_OFFSET + self.paymaster_data.len());
        v.extend_from_slice(paymaster.as_bytes());
        v.extend_from_slice(&limits);
        v.extend_from_slice(self.paymaster_data.as_ref());
        Ok(Bytes::from(v))
    }

    pub fn pack(&self) -> Result<PackedUserOperation, PackError> {
        let account_gas_limits = pack_u128_pair(
            ("verificationGasLimit", self.verification_gas_limit),
            ("callGasLimit", self.call_gas_limit),
        )?;
        let gas_fees = pack_u128_pair(
            ("maxPriorityFeePerGas", self.max_priority_fee_per_gas),
            ("maxFeePerGas", self.max_fee_per_gas),
        )?;
        Ok(PackedUserOperation {
            sender: self.sender,
            nonce: self.nonce,
            init_code: self.init_code(),
            call_data: self.call_data.clone(),
            account_gas_limits,
            pre_verification_gas: self.pre_verification_gas,
            gas_fees,
            paymaster_and_data: self.paymaster_and_data()?,
            signature: self.signature.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;

    fn sample_op() -> UserOperation {
        UserOperation {
            sender: Address::repeat_byte(0x11),
            nonce: U256::from(7u64),
            call_data: Bytes::from(vec![0xde, 0xad]),
            call_gas_limit: U256::from(110_000u64),
            verification_gas_limit: U256::from(110_000u64),
            pre_verification_gas: U256::from(220_000u64),
            max_fee_per_gas: U256::from(3_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            ..Default::default()
        }
    }

    #[test]
    fn gas_limit_word_layout() {
        let word = pack_u128_pair(
            ("verificationGasLimit", U256::from(1u64)),
            ("callGasLimit", U256::from(2u64)),
        )
        .unwrap();
        let mut expected = [0u8; 32];
        expected[15] = 0x01;
        expected[31] = 0x02;
        assert_eq!(word, expected);
    }

    #[test]
    fn rejects_values_wider_than_128_bits() {
        let too_big = U256::from(u128::MAX) + U256::one();
        let err = pack_u128_pair(
            ("verificationGasLimit", too_big),
            ("callGasLimit", U256::one()),
        )
        .unwrap_err();
        assert_eq!(
            err,
            PackError::ValueTooLarge {
                field: "verificationGasLimit",
                value: too_big
            }
        );

        let op = UserOperation {
            max_fee_per_gas: too_big,
            ..sample_op()
        };
        assert!(matches!(
            op.pack(),
            Err(PackError::ValueTooLarge {
                field: "maxFeePerGas",
                ..
            })
        ));
    }

    #[test]
    fn u128_max_still_fits() {
        let word = pack_u128_pair(
            ("a", U256::from(u128::MAX)),
            ("b", U256::from(u128::MAX)),
        )
        .unwrap();
        assert_eq!(unpack_u128_pair(&word), (u128::MAX, u128::MAX));
    }

    #[test]
    fn gas_fees_put_priority_fee_first() {
        let packed = sample_op().pack().unwrap();
        assert_eq!(
            unpack_u128_pair(&packed.gas_fees),
            (1_000_000_000, 3_000_000_000)
        );
        assert_eq!(unpack_u128_pair(&packed.account_gas_limits), (110_000, 110_000));
    }

    #[test]
    fn no_paymaster_means_empty_paymaster_and_data() {
        let packed = sample_op().pack().unwrap();
        assert!(packed.paymaster_and_data.is_empty());

        let zero = UserOperation {
            paymaster: Some(Address::zero()),
            paymaster_verification_gas_limit: U256::from(1_000_000u64),
            ..sample_op()
        };
        assert!(zero.pack().unwrap().paymaster_and_data.is_empty());
    }

    #[test]
    fn paymaster_and_data_layout() {
        let paymaster = Address::repeat_byte(0x22);
        let op = UserOperation {
            paymaster: Some(paymaster),
            paymaster_verification_gas_limit: U256::from(1_000_000u64),
            paymaster_post_op_gas_limit: U256::from(21_000u64),
            paymaster_data: Bytes::from(vec![0xaa, 0xbb, 0xcc]),
            ..sample_op()
        };
        let pnd = op.paymaster_and_data().unwrap();
        assert_eq!(pnd.len(), PAYMASTER_DATA_OFFSET + 3);
        assert_eq!(&pnd[..20], paymaster.as_bytes());
        let mut limits = [0u8; 32];
        limits.copy_from_slice(&pnd[20..52]);
        assert_eq!(unpack_u128_pair(&limits), (1_000_000, 21_000));
        assert_eq!(&pnd[52..], &[0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn init_code_is_factory_then_data() {
        let factory = Address::repeat_byte(0x33);
        let op = UserOperation {
            factory: Some(factory),
            factory_data: Bytes::from(vec![0x01, 0x02]),
            ..sample_op()
        };
        let init = op.pack().unwrap().init_code;
        assert_eq!(&init[..20], factory.as_bytes());
        assert_eq!(&init[20..], &[0x01, 0x02]);

        assert!(sample_op().pack().unwrap().init_code.is_empty());
    }

    #[test]
    fn packing_is_deterministic() {
        let op = UserOperation {
            paymaster: Some(Address::repeat_byte(0x22)),
            ..sample_op()
        };
        assert_eq!(op.pack().unwrap(), op.pack().unwrap());
    }
}
