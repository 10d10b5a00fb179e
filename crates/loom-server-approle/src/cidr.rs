// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! CIDR list parsing, source-address checks and the role/SecretID subset law.

use std::collections::BTreeSet;
use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::{AppRoleError, Result};

/// Parse `entries` (each of which may itself be comma separated) into a
/// sorted, deduplicated list of canonical CIDR strings.
pub fn normalize_cidr_list<S: AsRef<str>>(entries: &[S]) -> Result<Vec<String>> {
	let mut out = BTreeSet::new();
	for entry in entries {
		for raw in entry.as_ref().split(',') {
			let raw = raw.trim();
			if raw.is_empty() {
				continue;
			}
			out.insert(parse_cidr(raw)?.to_string());
		}
	}
	Ok(out.into_iter().collect())
}

/// Split a stored comma-joined list.
pub fn split_cidr_list(joined: &str) -> Vec<String> {
	joined
		.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(str::to_string)
		.collect()
}

pub fn join_cidr_list(cidrs: &[String]) -> String {
	cidrs.join(",")
}

fn parse_cidr(raw: &str) -> Result<IpNet> {
	raw
		.parse::<IpNet>()
		.map_err(|_| AppRoleError::invalid(format!("invalid CIDR block {raw:?}")))
}

fn parse_all<S: AsRef<str>>(cidrs: &[S]) -> Result<Vec<IpNet>> {
	cidrs.iter().map(|c| parse_cidr(c.as_ref().trim())).collect()
}

/// True when `ip` falls inside at least one block of `cidrs`.
pub fn ip_in_cidrs<S: AsRef<str>>(ip: IpAddr, cidrs: &[S]) -> Result<bool> {
	Ok(parse_all(cidrs)?.iter().any(|net| net.contains(&ip)))
}

/// True when every block of `child` lies inside some block of `parent`.
/// An empty `parent` places no restriction.
pub fn is_subset<S: AsRef<str>, T: AsRef<str>>(child: &[S], parent: &[T]) -> Result<bool> {
	if parent.is_empty() {
		return Ok(true);
	}
	let parent = parse_all(parent)?;
	for block in parse_all(child)? {
		if !parent.iter().any(|p| p.contains(&block)) {
			return Ok(false);
		}
	}
	Ok(true)
}

/// Fail with an invalid-input error unless `child` is a subset of `parent`.
pub fn verify_subset<S: AsRef<str>, T: AsRef<str>>(child: &[S], parent: &[T]) -> Result<()> {
	if is_subset(child, parent)? {
		return Ok(());
	}
	let parent = parent.iter().map(|p| p.as_ref()).collect::<Vec<_>>().join(",");
	let child = child.iter().map(|c| c.as_ref()).collect::<Vec<_>>().join(",");
	Err(AppRoleError::invalid(format!(
		"failed to verify subset relationship between CIDR blocks on the role {parent:?} and CIDR blocks on the secret ID {child:?}"
	)))
}
