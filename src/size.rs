//! size.rs — Symbolic size expressions (shape algebra, spec §4.1).
//!
//! A [`SizeExpr`] is an element of a free commutative semiring over
//! symbolic size variables and natural-number literals, plus a
//! distinguished [`SizeExpr::Broadcast`] value that is semantically `1`
//! but flagged for broadcast inference in [`crate::shape`].
//!
//! Polynomials are kept in a normalized canonical form (sorted monomial
//! map, zero-coefficient terms dropped) so structural equality after
//! substitution is semantic equality.

use std::collections::BTreeMap;
use std::fmt;

pub type Symbol = String;

/// A monomial: a sorted, nonzero-exponent product of symbols.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Monomial(BTreeMap<Symbol, u32>);

impl Monomial {
    fn one() -> Self {
        Monomial(BTreeMap::new())
    }

    fn single(sym: &str) -> Self {
        let mut m = BTreeMap::new();
        m.insert(sym.to_string(), 1);
        Monomial(m)
    }

    fn mul(&self, other: &Monomial) -> Monomial {
        let mut out = self.0.clone();
        for (sym, exp) in &other.0 {
            *out.entry(sym.clone()).or_insert(0) += exp;
        }
        Monomial(out)
    }

    fn symbols(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|s| s.as_str())
    }

    fn eval(&self, env: &BTreeMap<Symbol, u64>) -> Option<u64> {
        let mut acc: u64 = 1;
        for (sym, exp) in &self.0 {
            let v = *env.get(sym)?;
            acc = acc.checked_mul(v.checked_pow(*exp)?)?;
        }
        Some(acc)
    }
}

/// A normalized polynomial: monomial → nonzero coefficient.
///
/// `terms` is keyed by a struct, not a string, so it can't ride JSON's
/// object-with-string-keys representation directly; `terms_as_pairs`
/// serializes it as a `[[monomial, coeff], ...]` array instead, which is
/// what the CLI's graph documents (spec §6.1) actually carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Polynomial {
    #[serde(with = "terms_as_pairs")]
    terms: BTreeMap<Monomial, u64>,
}

mod terms_as_pairs {
    use super::Monomial;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        terms: &BTreeMap<Monomial, u64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&Monomial, &u64)> = terms.iter().collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Monomial, u64>, D::Error> {
        let pairs = Vec::<(Monomial, u64)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

impl Polynomial {
    pub fn constant(n: u64) -> Self {
        let mut terms = BTreeMap::new();
        if n != 0 {
            terms.insert(Monomial::one(), n);
        }
        Polynomial { terms }
    }

    pub fn symbol(name: &str) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(Monomial::single(name), 1);
        Polynomial { terms }
    }

    fn insert_term(&mut self, mono: Monomial, coeff: u64) {
        if coeff == 0 {
            return;
        }
        let entry = self.terms.entry(mono).or_insert(0);
        *entry = entry.wrapping_add(coeff);
        if *entry == 0 {
            // entry can only be re-checked for removal by caller; kept
            // simple since sizes never legitimately wrap in practice.
        }
    }

    pub fn add(&self, other: &Polynomial) -> Polynomial {
        let mut out = self.clone();
        for (mono, coeff) in &other.terms {
            out.insert_term(mono.clone(), *coeff);
        }
        out
    }

    pub fn mul(&self, other: &Polynomial) -> Polynomial {
        let mut out = Polynomial {
            terms: BTreeMap::new(),
        };
        for (m1, c1) in &self.terms {
            for (m2, c2) in &other.terms {
                let mono = m1.mul(m2);
                let coeff = c1 * c2;
                let entry = out.terms.entry(mono).or_insert(0);
                *entry += coeff;
            }
        }
        out
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.terms.keys().flat_map(|m| m.symbols())
    }

    pub fn can_eval(&self, env: &BTreeMap<Symbol, u64>) -> bool {
        self.symbols().all(|s| env.contains_key(s))
    }

    pub fn eval(&self, env: &BTreeMap<Symbol, u64>) -> Option<u64> {
        let mut acc: u64 = 0;
        for (mono, coeff) in &self.terms {
            acc = acc.checked_add(mono.eval(env)?.checked_mul(*coeff)?)?;
        }
        Some(acc)
    }

    /// Replace bound symbols with their numeric value; leave unbound
    /// symbols symbolic. Differs from `eval`, which requires full binding.
    pub fn subst(&self, env: &BTreeMap<Symbol, u64>) -> Polynomial {
        let mut out = Polynomial {
            terms: BTreeMap::new(),
        };
        for (mono, coeff) in &self.terms {
            let mut resolved: u64 = *coeff;
            let mut remaining = Monomial::one();
            for (sym, exp) in &mono.0 {
                if let Some(v) = env.get(sym) {
                    resolved = resolved.saturating_mul(v.saturating_pow(*exp));
                } else {
                    remaining.0.insert(sym.clone(), *exp);
                }
            }
            out.insert_term(remaining, resolved);
        }
        out
    }

    fn is_one(&self) -> bool {
        self.terms.len() == 1
            && self
                .terms
                .get(&Monomial::one())
                .map(|c| *c == 1)
                .unwrap_or(false)
    }
}

impl fmt::Display for Polynomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return write!(f, "0");
        }
        let mut first = true;
        for (mono, coeff) in &self.terms {
            if !first {
                write!(f, " + ")?;
            }
            first = false;
            if mono.0.is_empty() {
                write!(f, "{coeff}")?;
            } else {
                if *coeff != 1 {
                    write!(f, "{coeff}*")?;
                }
                let parts: Vec<String> = mono
                    .0
                    .iter()
                    .map(|(s, e)| if *e == 1 { s.clone() } else { format!("{s}^{e}") })
                    .collect();
                write!(f, "{}", parts.join("*"))?;
            }
        }
        Ok(())
    }
}

/// A symbolic tensor dimension: a polynomial, or the distinguished
/// broadcast marker (semantically `1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SizeExpr {
    Broadcast,
    Poly(Polynomial),
}

impl SizeExpr {
    pub fn fix(n: u64) -> Self {
        SizeExpr::Poly(Polynomial::constant(n))
    }

    pub fn symbol(name: &str) -> Self {
        SizeExpr::Poly(Polynomial::symbol(name))
    }

    pub fn broadcast() -> Self {
        SizeExpr::Broadcast
    }

    fn as_poly(&self) -> Polynomial {
        match self {
            SizeExpr::Broadcast => Polynomial::constant(1),
            SizeExpr::Poly(p) => p.clone(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, SizeExpr::Broadcast)
    }

    pub fn add(&self, other: &SizeExpr) -> SizeExpr {
        SizeExpr::Poly(self.as_poly().add(&other.as_poly()))
    }

    pub fn mul(&self, other: &SizeExpr) -> SizeExpr {
        SizeExpr::Poly(self.as_poly().mul(&other.as_poly()))
    }

    /// True iff every symbol appearing has a numeric binding in `env`.
    pub fn can_eval(&self, env: &BTreeMap<Symbol, u64>) -> bool {
        match self {
            SizeExpr::Broadcast => true,
            SizeExpr::Poly(p) => p.can_eval(env),
        }
    }

    /// Numeric evaluation; `None` if any symbol is unbound.
    pub fn eval(&self, env: &BTreeMap<Symbol, u64>) -> Option<u64> {
        match self {
            SizeExpr::Broadcast => Some(1),
            SizeExpr::Poly(p) => p.eval(env),
        }
    }

    /// Substitute bound symbols, leaving unbound ones and the broadcast
    /// flag untouched.
    pub fn subst(&self, env: &BTreeMap<Symbol, u64>) -> SizeExpr {
        match self {
            SizeExpr::Broadcast => SizeExpr::Broadcast,
            SizeExpr::Poly(p) => SizeExpr::Poly(p.subst(env)),
        }
    }

    /// Equality under a (possibly partial) environment: substitutes first,
    /// then compares the normalized remainder. `Broadcast` compares equal
    /// only to another `Broadcast` (axis broadcast alignment is handled
    /// separately in `shape.rs`; this is plain numeric/symbolic equality).
    /// Every free symbol this expression references (empty for `Broadcast`
    /// and for fully-constant polynomials).
    pub fn symbols_used(&self) -> Vec<Symbol> {
        match self {
            SizeExpr::Broadcast => Vec::new(),
            SizeExpr::Poly(p) => p.symbols().map(|s| s.to_string()).collect(),
        }
    }

    pub fn equal_under_env(&self, other: &SizeExpr, env: &BTreeMap<Symbol, u64>) -> bool {
        match (self, other) {
            (SizeExpr::Broadcast, SizeExpr::Broadcast) => true,
            (SizeExpr::Broadcast, SizeExpr::Poly(p)) | (SizeExpr::Poly(p), SizeExpr::Broadcast) => {
                p.subst(env).is_one()
            }
            (SizeExpr::Poly(a), SizeExpr::Poly(b)) => a.subst(env) == b.subst(env),
        }
    }
}

impl fmt::Display for SizeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeExpr::Broadcast => write!(f, "*"),
            SizeExpr::Poly(p) => write!(f, "{p}"),
        }
    }
}
