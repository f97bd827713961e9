//! The `group` module provides the algebraic group in which cross-tags
//! live. The protocol is written once against the `Group` capability
//! and runs over either a prime-order subgroup of integers modulo a
//! safe prime (`ModpGroup`) or the Ristretto group (`RistrettoGroup`).
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use lazy_static::lazy_static;
use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::errors::{SseError, SseResult};
use crate::utils::format::fixed_bytes_from_slice;
use crate::utils::prf::{prf_bytes, MAC_LEN};

lazy_static! {
  // RFC 3526, 2048-bit MODP group (safe prime)
  static ref RFC3526_2048_P: BigUint = BigUint::from_bytes_be(&hex_literal::hex!(
    "FFFFFFFF FFFFFFFF C90FDAA2 2168C234 C4C6628B 80DC1CD1
     29024E08 8A67CC74 020BBEA6 3B139B22 514A0879 8E3404DD
     EF9519B3 CD3A431B 302B0A6D F25F1437 4FE1356D 6D51C245
     E485B576 625E7EC6 F44C42E9 A637ED6B 0BFF5CB6 F406B7ED
     EE386BFB 5A899FA5 AE9F2411 7C4B1FE6 49286651 ECE45B3D
     C2007CB8 A163BF05 98DA4836 1C55D39A 69163FA8 FD24CF5F
     83655D23 DCA3AD96 1C62F356 208552BB 9ED52907 7096966D
     670C354E 4ABC9804 F1746C08 CA18217C 32905E46 2E36CE3B
     E39E772C 180E8603 9B2783A2 EC07A28F B5C55DF0 6F4C52C9
     DE2BCBF6 95581718 3995497C EA956AE5 15D22618 98FA0510
     15728E5A 8AACAA68 FFFFFFFF FFFFFFFF"
  ));
  // RFC 2409 first Oakley group, 768-bit safe prime. Too small for
  // real deployments, kept for fast tests and benchmarks.
  static ref OAKLEY_768_P: BigUint = BigUint::from_bytes_be(&hex_literal::hex!(
    "FFFFFFFF FFFFFFFF C90FDAA2 2168C234 C4C6628B 80DC1CD1
     29024E08 8A67CC74 020BBEA6 3B139B22 514A0879 8E3404DD
     EF9519B3 CD3A431B 302B0A6D F25F1437 4FE1356D 6D51C245
     E485B576 625E7EC6 F44C42E9 A63A3620 FFFFFFFF FFFFFFFF"
  ));
}

// 4 = 2^2 is a quadratic residue modulo any odd prime, so it lies in
// the order-q subgroup of a safe prime p = 2q + 1
const QR_GENERATOR: u32 = 4;

/// Serializable description of the group, stored next to the keys so
/// that a client reloads exactly the group it encrypted under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum GroupParams {
  /// Hex-encoded safe prime modulus and subgroup generator
  Modp { p: String, g: String },
  Ristretto,
}

impl GroupParams {
  pub fn rfc3526_2048() -> Self {
    ModpGroup::rfc3526_2048().params()
  }

  pub fn oakley_768() -> Self {
    ModpGroup::oakley_768().params()
  }
}

/// The `Group` capability needed by the protocol: exponentiation of the
/// generator and of arbitrary elements, and arithmetic in the exponent
/// space (multiplication and inversion).
pub trait Group: Clone + Send + Sync {
  type Scalar: Clone + Debug + PartialEq + Send + Sync;
  type Element: Clone + Debug + PartialEq + Send + Sync;

  /// Maps PRF output to an invertible, non-zero exponent, retrying by
  /// incrementing the raw value when it is not usable
  fn scalar_from_prf(&self, mac: &[u8; MAC_LEN]) -> Self::Scalar;
  fn mul(&self, a: &Self::Scalar, b: &Self::Scalar) -> Self::Scalar;
  fn inverse(&self, a: &Self::Scalar) -> SseResult<Self::Scalar>;
  /// generator^s
  fn exp_generator(&self, s: &Self::Scalar) -> Self::Element;
  /// base^s
  fn exp(&self, base: &Self::Element, s: &Self::Scalar) -> Self::Element;
  fn element_to_bytes(&self, e: &Self::Element) -> Vec<u8>;
  fn element_from_bytes(&self, bytes: &[u8]) -> SseResult<Self::Element>;
  fn scalar_to_bytes(&self, s: &Self::Scalar) -> Vec<u8>;
  fn scalar_from_bytes(&self, bytes: &[u8]) -> SseResult<Self::Scalar>;
  fn params(&self) -> GroupParams;
}

/// Keyed PRF into the exponent space of `group`
pub fn prf_exponent<G: Group>(
  group: &G,
  key: &[u8],
  message: &[u8],
) -> SseResult<G::Scalar> {
  let mac = prf_bytes(key, message)?;
  Ok(group.scalar_from_prf(&mac))
}

/// Prime-order subgroup of Z_p^* for a safe prime `p = 2q + 1`.
/// Exponents live in Z_q.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModpGroup {
  p: BigUint,
  q: BigUint,
  g: BigUint,
}

impl ModpGroup {
  /// Builds the group, checking that `g` generates a subgroup whose
  /// order divides `q = (p - 1) / 2`. `p` is expected to be a safe
  /// prime.
  pub fn new(p: BigUint, g: BigUint) -> SseResult<Self> {
    let two = BigUint::from(2u32);
    if p <= BigUint::from(5u32) || (&p % &two).is_zero() {
      return Err(SseError::InvalidInput(
        "modulus must be an odd prime larger than 5".into(),
      ));
    }
    if g < two || g >= &p - 1u32 {
      return Err(SseError::InvalidInput(
        "generator must lie in [2, p - 2]".into(),
      ));
    }
    let q = (&p - 1u32) / &two;
    if !g.modpow(&q, &p).is_one() {
      return Err(SseError::InvalidInput(
        "generator is not in the prime-order subgroup".into(),
      ));
    }
    Ok(Self { p, q, g })
  }

  pub fn rfc3526_2048() -> Self {
    Self::from_safe_prime(RFC3526_2048_P.clone())
  }

  pub fn oakley_768() -> Self {
    Self::from_safe_prime(OAKLEY_768_P.clone())
  }

  // Only used with the built-in safe primes, for which the generator
  // check is known to hold
  fn from_safe_prime(p: BigUint) -> Self {
    let q = (&p - 1u32) / 2u32;
    Self {
      p,
      q,
      g: BigUint::from(QR_GENERATOR),
    }
  }

  pub fn from_params(params: &GroupParams) -> SseResult<Self> {
    match params {
      GroupParams::Modp { p, g } => Self::new(parse_hex(p)?, parse_hex(g)?),
      GroupParams::Ristretto => Err(SseError::InvalidInput(
        "group parameters describe the ristretto backend".into(),
      )),
    }
  }

  pub fn modulus(&self) -> &BigUint {
    &self.p
  }

  pub fn order(&self) -> &BigUint {
    &self.q
  }

  pub fn generator(&self) -> &BigUint {
    &self.g
  }
}

impl Group for ModpGroup {
  type Scalar = BigUint;
  type Element = BigUint;

  fn scalar_from_prf(&self, mac: &[u8; MAC_LEN]) -> BigUint {
    let mut raw = BigUint::from_bytes_be(mac);
    loop {
      let e = &raw % &self.q;
      if !e.is_zero() && e.modinv(&self.q).is_some() {
        return e;
      }
      raw += 1u32;
    }
  }

  fn mul(&self, a: &BigUint, b: &BigUint) -> BigUint {
    (a * b) % &self.q
  }

  fn inverse(&self, a: &BigUint) -> SseResult<BigUint> {
    a.modinv(&self.q).ok_or_else(|| {
      SseError::InvalidInput("exponent is not invertible".into())
    })
  }

  fn exp_generator(&self, s: &BigUint) -> BigUint {
    self.g.modpow(s, &self.p)
  }

  fn exp(&self, base: &BigUint, s: &BigUint) -> BigUint {
    base.modpow(s, &self.p)
  }

  fn element_to_bytes(&self, e: &BigUint) -> Vec<u8> {
    e.to_bytes_be()
  }

  fn element_from_bytes(&self, bytes: &[u8]) -> SseResult<BigUint> {
    let e = BigUint::from_bytes_be(bytes);
    if bytes.is_empty() || e.is_zero() || e >= self.p {
      return Err(SseError::Encoding(
        "group element out of range for modulus".into(),
      ));
    }
    Ok(e)
  }

  fn scalar_to_bytes(&self, s: &BigUint) -> Vec<u8> {
    s.to_bytes_be()
  }

  fn scalar_from_bytes(&self, bytes: &[u8]) -> SseResult<BigUint> {
    let s = BigUint::from_bytes_be(bytes);
    if bytes.is_empty() || s >= self.q {
      return Err(SseError::Encoding(
        "exponent out of range for group order".into(),
      ));
    }
    Ok(s)
  }

  fn params(&self) -> GroupParams {
    GroupParams::Modp {
      p: self.p.to_str_radix(16),
      g: self.g.to_str_radix(16),
    }
  }
}

/// Prime-order Ristretto group over Curve25519; exponents are scalars
/// modulo the group order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RistrettoGroup;

impl Group for RistrettoGroup {
  type Scalar = Scalar;
  type Element = RistrettoPoint;

  fn scalar_from_prf(&self, mac: &[u8; MAC_LEN]) -> Scalar {
    let mut s = Scalar::from_bytes_mod_order(*mac);
    while s == Scalar::ZERO {
      s = s + Scalar::ONE;
    }
    s
  }

  fn mul(&self, a: &Scalar, b: &Scalar) -> Scalar {
    a * b
  }

  fn inverse(&self, a: &Scalar) -> SseResult<Scalar> {
    if *a == Scalar::ZERO {
      return Err(SseError::InvalidInput("zero scalar has no inverse".into()));
    }
    Ok(a.invert())
  }

  fn exp_generator(&self, s: &Scalar) -> RistrettoPoint {
    RistrettoPoint::mul_base(s)
  }

  fn exp(&self, base: &RistrettoPoint, s: &Scalar) -> RistrettoPoint {
    base * s
  }

  fn element_to_bytes(&self, e: &RistrettoPoint) -> Vec<u8> {
    e.compress().to_bytes().to_vec()
  }

  fn element_from_bytes(&self, bytes: &[u8]) -> SseResult<RistrettoPoint> {
    CompressedRistretto(fixed_bytes_from_slice::<32>(bytes)?)
      .decompress()
      .ok_or_else(|| SseError::Encoding("invalid ristretto point".into()))
  }

  fn scalar_to_bytes(&self, s: &Scalar) -> Vec<u8> {
    s.to_bytes().to_vec()
  }

  fn scalar_from_bytes(&self, bytes: &[u8]) -> SseResult<Scalar> {
    let canonical: Option<Scalar> =
      Scalar::from_canonical_bytes(fixed_bytes_from_slice::<32>(bytes)?).into();
    canonical
      .ok_or_else(|| SseError::Encoding("non-canonical scalar".into()))
  }

  fn params(&self) -> GroupParams {
    GroupParams::Ristretto
  }
}

fn parse_hex(s: &str) -> SseResult<BigUint> {
  BigUint::parse_bytes(s.as_bytes(), 16)
    .ok_or_else(|| SseError::Encoding(format!("invalid hex integer: {}", s)))
}
