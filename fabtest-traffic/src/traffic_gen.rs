// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Seeded generation of traffic configs.
//!
//! The same seed, topology and set of available chips always generate the
//! same configs. Every generated config stays inside the mesh of its source
//! and only touches available chips.

use std::collections::BTreeSet;
use std::fmt;

use fabtest_topology::{ChipId, FabricResult, HopMap, MeshTopology, RoutingDirection};
use log::{debug, warn};
use rand::seq::{IteratorRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::config::{ChipSendType, NocSendType, TrafficConfig, TrafficDataConfig};
use crate::types::RandomSection;

#[derive(clap::ValueEnum, Clone, Copy, Default, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TrafficPattern {
    /// Each config sends from a random chip to a random chip of the same mesh
    #[default]
    RandomUnicast,

    /// Each config walks a random hop map from a random chip, either as
    /// unicast or as multicast arms
    RandomHops,

    /// Every chip of a mesh sends to one destination chosen at random
    AllToOne,

    /// Every chip sends to every other chip of its mesh
    AllToAll,
}

impl fmt::Display for TrafficPattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

pub struct TrafficGen<'a> {
    topology: &'a MeshTopology,
    chips: BTreeSet<ChipId>,
    rng: Xoshiro256PlusPlus,
}

impl<'a> TrafficGen<'a> {
    /// Generate traffic between the `available` chips that are part of
    /// `topology`.
    #[must_use]
    pub fn new(topology: &'a MeshTopology, available: &[ChipId], seed: u64) -> Self {
        Self {
            topology,
            chips: available
                .iter()
                .copied()
                .filter(|chip| topology.contains(*chip))
                .collect(),
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }

    pub fn generate(&mut self, section: &RandomSection) -> FabricResult<Vec<TrafficConfig>> {
        let sources = self.eligible_sources()?;
        if sources.is_empty() {
            warn!("No pair of available chips shares a mesh, no traffic generated");
            return Ok(Vec::new());
        }

        let mut configs = Vec::new();
        match section.pattern {
            TrafficPattern::RandomUnicast => {
                for _ in 0..section.num_configs {
                    let Some(src) = sources.choose(&mut self.rng).copied() else {
                        break;
                    };
                    if let Some(dst) = self.random_dest(src)? {
                        configs.push(self.unicast(src, dst, section)?);
                    }
                }
            }
            TrafficPattern::RandomHops => {
                for _ in 0..section.num_configs {
                    let Some(src) = sources.choose(&mut self.rng).copied() else {
                        break;
                    };
                    let chip_send_type = self.random_chip_send_type();
                    let hops = self.random_hops(
                        src,
                        section.max_hops,
                        chip_send_type == ChipSendType::Multicast,
                    )?;
                    if hops.is_empty() {
                        continue;
                    }
                    let data_config = self.data_config(chip_send_type, section)?;
                    configs.push(
                        TrafficConfig::new(src, data_config, None, Some(hops))?
                            .with_bidirectional(section.bidirectional),
                    );
                }
            }
            TrafficPattern::AllToOne => {
                if let Some(dst) = sources.choose(&mut self.rng).copied() {
                    for src in self.mesh_peers(dst)? {
                        configs.push(self.unicast(src, dst, section)?);
                    }
                }
            }
            TrafficPattern::AllToAll => {
                for src in &sources {
                    for dst in self.mesh_peers(*src)? {
                        configs.push(self.unicast(*src, dst, section)?);
                    }
                }
            }
        }

        debug!(
            "Generated {} traffic config(s) for pattern {}",
            configs.len(),
            section.pattern
        );
        Ok(configs)
    }

    pub fn random_chip_send_type(&mut self) -> ChipSendType {
        if self.rng.gen_bool(0.5) {
            ChipSendType::Multicast
        } else {
            ChipSendType::Unicast
        }
    }

    pub fn random_noc_send_type(&mut self) -> NocSendType {
        NocSendType::ALL
            .choose(&mut self.rng)
            .copied()
            .unwrap_or_default()
    }

    /// A random available chip in the same mesh as `src`.
    pub fn random_dest(&mut self, src: ChipId) -> FabricResult<Option<ChipId>> {
        let peers = self.mesh_peers(src)?;
        Ok(peers.into_iter().choose(&mut self.rng))
    }

    /// A random hop map from `src` that stays on available chips.
    ///
    /// A unicast map leads to a random chip no more than `max_hops` away in
    /// either dimension. A multicast map has between one and four arms. The
    /// map is empty if `src` has no reachable neighbour.
    pub fn random_hops(
        &mut self,
        src: ChipId,
        max_hops: Option<u32>,
        multicast: bool,
    ) -> FabricResult<HopMap> {
        let cap = max_hops.unwrap_or(u32::MAX);

        if !multicast {
            let mut candidates = Vec::new();
            for dst in self.mesh_peers(src)? {
                let hops = self.topology.hops_between(src, dst)?;
                if hops.values().all(|count| *count <= cap) {
                    candidates.push(hops);
                }
            }
            return Ok(candidates
                .into_iter()
                .choose(&mut self.rng)
                .unwrap_or_default());
        }

        let mut directions = Vec::new();
        for direction in RoutingDirection::ALL {
            let room = self.room(src, direction, cap);
            if room > 0 {
                directions.push((direction, room));
            }
        }
        if directions.is_empty() {
            return Ok(HopMap::new());
        }

        directions.shuffle(&mut self.rng);
        let num_arms = self.rng.gen_range(1..=directions.len());
        let mut hops = HopMap::new();
        for (direction, room) in directions.into_iter().take(num_arms) {
            hops.insert(direction, self.rng.gen_range(1..=room));
        }
        Ok(hops)
    }

    /// Number of consecutive available chips from `src` in `direction`.
    fn room(&self, src: ChipId, direction: RoutingDirection, cap: u32) -> u32 {
        let mut room = 0;
        while room < cap {
            match self.topology.step(src, direction, room + 1) {
                Ok(chip) if self.chips.contains(&chip) => room += 1,
                _ => break,
            }
        }
        room
    }

    /// Available chips in the same mesh as `src`, excluding `src`.
    fn mesh_peers(&self, src: ChipId) -> FabricResult<Vec<ChipId>> {
        let mesh_id = self.topology.mesh_of(src)?;
        Ok(self
            .topology
            .mesh(mesh_id)?
            .chip_ids()
            .filter(|chip| *chip != src && self.chips.contains(chip))
            .collect())
    }

    fn eligible_sources(&self) -> FabricResult<Vec<ChipId>> {
        let mut sources = Vec::new();
        for chip in &self.chips {
            if !self.mesh_peers(*chip)?.is_empty() {
                sources.push(*chip);
            }
        }
        Ok(sources)
    }

    fn data_config(
        &mut self,
        chip_send_type: ChipSendType,
        section: &RandomSection,
    ) -> FabricResult<TrafficDataConfig> {
        let noc_send_type = self.random_noc_send_type();
        TrafficDataConfig::new(
            chip_send_type,
            noc_send_type,
            section.num_packets,
            section.payload_size,
        )
    }

    fn unicast(
        &mut self,
        src: ChipId,
        dst: ChipId,
        section: &RandomSection,
    ) -> FabricResult<TrafficConfig> {
        let data_config = self.data_config(ChipSendType::Unicast, section)?;
        Ok(
            TrafficConfig::new(src, data_config, Some(vec![dst]), None)?
                .with_bidirectional(section.bidirectional),
        )
    }
}
