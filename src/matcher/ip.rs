//! IP address pattern matching.
//!
//! Patterns are exact addresses, CIDR ranges, or `*`. They are compiled once
//! when a rule is built; invalid patterns are dropped with a warning so the
//! remaining patterns keep working.

use std::net::IpAddr;

use dashmap::DashMap;
use ipnet::IpNet;
use tracing::warn;

/// Maximum number of memoized match results per pattern set.
pub const DEFAULT_MATCH_CACHE_CAPACITY: usize = 1000;

const WILDCARD: &str = "*";

/// A pre-computed CIDR range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    base: IpAddr,
    prefix_len: u8,
    full_bytes: usize,
    remainder_mask: u8,
}

impl CidrRange {
    /// Parse a range such as `10.0.0.0/8` or `2001:db8::/32`.
    ///
    /// Returns `None` for malformed input or a prefix longer than the
    /// address family allows.
    pub fn parse(cidr: &str) -> Option<Self> {
        let net: IpNet = cidr.trim().parse().ok()?;
        let prefix_len = net.prefix_len();
        let remainder_bits = prefix_len % 8;
        let remainder_mask = if remainder_bits > 0 {
            0xFFu8 << (8 - remainder_bits)
        } else {
            0
        };

        Some(Self {
            base: net.addr(),
            prefix_len,
            full_bytes: usize::from(prefix_len / 8),
            remainder_mask,
        })
    }

    /// Prefix length of the range.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Check whether an address lies inside the range.
    ///
    /// Addresses of a different family never match.
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.base, addr) {
            (IpAddr::V4(base), IpAddr::V4(candidate)) => {
                self.compare(&base.octets(), &candidate.octets())
            }
            (IpAddr::V6(base), IpAddr::V6(candidate)) => {
                self.compare(&base.octets(), &candidate.octets())
            }
            _ => false,
        }
    }

    fn compare(&self, base: &[u8], candidate: &[u8]) -> bool {
        if base[..self.full_bytes] != candidate[..self.full_bytes] {
            return false;
        }

        if self.remainder_mask == 0 {
            return true;
        }

        let index = self.full_bytes;
        base[index] & self.remainder_mask == candidate[index] & self.remainder_mask
    }
}

/// A compiled set of IP patterns with a bounded result memo.
///
/// An empty set, or a set containing `*`, matches every address.
#[derive(Debug)]
pub struct IpPatternSet {
    match_any: bool,
    exact: Vec<IpAddr>,
    ranges: Vec<CidrRange>,
    memo: DashMap<IpAddr, bool>,
    memo_capacity: usize,
}

impl IpPatternSet {
    /// Compile a set of patterns with the default memo capacity.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_memo_capacity(patterns, DEFAULT_MATCH_CACHE_CAPACITY)
    }

    /// Compile a set of patterns, memoizing at most `memo_capacity` results.
    pub fn with_memo_capacity<I, S>(patterns: I, memo_capacity: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self {
            match_any: false,
            exact: Vec::new(),
            ranges: Vec::new(),
            memo: DashMap::new(),
            memo_capacity,
        };

        let mut seen_any = false;
        for pattern in patterns {
            seen_any = true;
            let pattern = pattern.as_ref().trim();

            if pattern == WILDCARD {
                set.match_any = true;
                set.exact.clear();
                set.ranges.clear();
                return set;
            }

            if pattern.contains('/') {
                match CidrRange::parse(pattern) {
                    Some(range) => set.ranges.push(range),
                    None => warn!(pattern = %pattern, "Skipping invalid CIDR pattern"),
                }
            } else {
                match pattern.parse::<IpAddr>() {
                    Ok(addr) => set.exact.push(addr),
                    Err(_) => warn!(pattern = %pattern, "Skipping invalid IP pattern"),
                }
            }
        }

        set.match_any = !seen_any;
        set
    }

    /// Whether the set matches every address.
    pub fn is_match_any(&self) -> bool {
        self.match_any
    }

    /// Check an address given as text. Unparsable input never matches.
    pub fn matches(&self, ip: &str) -> bool {
        if self.match_any {
            return true;
        }

        match ip.trim().parse::<IpAddr>() {
            Ok(addr) => self.matches_addr(addr),
            Err(_) => false,
        }
    }

    /// Check a parsed address.
    pub fn matches_addr(&self, addr: IpAddr) -> bool {
        if self.match_any {
            return true;
        }

        if let Some(cached) = self.memo.get(&addr) {
            return *cached;
        }

        let result = self.exact.contains(&addr) || self.ranges.iter().any(|r| r.contains(addr));

        // Approximate bound: concurrent inserts may overshoot by a few entries.
        if self.memo.len() < self.memo_capacity {
            self.memo.insert(addr, result);
        }

        result
    }

    /// Number of memoized results.
    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }
}
