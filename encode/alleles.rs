use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One of the four DNA bases an allele call is written with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Nucleotide {
    A,
    C,
    G,
    T,
}

impl Nucleotide {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'A' => Some(Self::A),
            b'C' => Some(Self::C),
            b'G' => Some(Self::G),
            b'T' => Some(Self::T),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::A => 'A',
            Self::C => 'C',
            Self::G => 'G',
            Self::T => 'T',
        }
    }
}

impl fmt::Display for Nucleotide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// An unphased two-allele genotype call such as `AT`. The order of the two
/// alleles carries no meaning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AllelePair(pub Nucleotide, pub Nucleotide);

impl AllelePair {
    /// Parses a call of exactly two characters over `{A, C, G, T}`.
    pub fn parse(text: &str) -> Option<Self> {
        match text.as_bytes() {
            [first, second] => Some(Self(
                Nucleotide::from_byte(*first)?,
                Nucleotide::from_byte(*second)?,
            )),
            _ => None,
        }
    }

    pub fn alleles(self) -> [Nucleotide; 2] {
        [self.0, self.1]
    }
}

/// The reference and alternate allele of a biallelic marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceAlleles {
    pub reference: Nucleotide,
    pub alternate: Nucleotide,
}

impl ReferenceAlleles {
    /// Signed reference dosage of a call: 1 for a reference homozygote, -1 for an
    /// alternate homozygote and 0 for either heterozygous ordering. Returns `None`
    /// when the call carries an allele that is neither reference nor alternate.
    pub fn signed_dosage(&self, call: AllelePair) -> Option<f64> {
        let mut reference_copies = 0u8;
        for allele in call.alleles() {
            if allele == self.reference {
                reference_copies += 1;
            } else if allele != self.alternate {
                return None;
            }
        }
        Some(f64::from(reference_copies) - 1.0)
    }
}

impl fmt::Display for ReferenceAlleles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.reference, self.alternate)
    }
}

/// Extracts the `(reference, alternate)` alleles a column name carries in a
/// trailing `_<allele>_<allele>` suffix, e.g. `SNP1_A_T`.
pub fn parse_labeled_alleles(column_name: &str) -> Option<(Nucleotide, Nucleotide)> {
    match column_name.as_bytes() {
        [.., b'_', reference, b'_', alternate] => Some((
            Nucleotide::from_byte(*reference)?,
            Nucleotide::from_byte(*alternate)?,
        )),
        _ => None,
    }
}

/// Assigns reference and alternate alleles from the calls observed at one marker.
///
/// The marker must be biallelic and polymorphic: exactly two distinct alleles
/// across all calls. The alphabetically first allele becomes the reference. On
/// failure the set of observed alleles is returned so the caller can report it.
pub fn learn_reference_alleles<I>(calls: I) -> Result<ReferenceAlleles, BTreeSet<Nucleotide>>
where
    I: IntoIterator<Item = AllelePair>,
{
    let observed: BTreeSet<Nucleotide> = calls.into_iter().flat_map(AllelePair::alleles).collect();
    let mut alleles = observed.iter().copied();
    match (alleles.next(), alleles.next(), alleles.next()) {
        (Some(reference), Some(alternate), None) => Ok(ReferenceAlleles {
            reference,
            alternate,
        }),
        _ => Err(observed),
    }
}

/// Formats an observed allele set as `{A, T}` for error messages.
pub fn format_allele_set(alleles: &BTreeSet<Nucleotide>) -> String {
    format!("{{{}}}", alleles.iter().join(", "))
}
