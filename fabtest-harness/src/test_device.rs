// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The work assigned to one open device during a test.

use fabtest_device::{KernelConfig, Program};
use fabtest_topology::{ChipId, RoutingDirection};
use fabtest_traffic::{ChipSendType, NocSendType, ReceiverDescriptor, SenderDescriptor};

/// Descriptors attached to one chip, waiting to be turned into a program.
#[derive(Debug)]
pub struct TestDevice {
    chip_id: ChipId,
    senders: Vec<SenderDescriptor>,
    receivers: Vec<ReceiverDescriptor>,
}

impl TestDevice {
    #[must_use]
    pub fn new(chip_id: ChipId) -> Self {
        Self {
            chip_id,
            senders: Vec::new(),
            receivers: Vec::new(),
        }
    }

    #[must_use]
    pub fn chip_id(&self) -> ChipId {
        self.chip_id
    }

    #[must_use]
    pub fn senders(&self) -> &[SenderDescriptor] {
        &self.senders
    }

    #[must_use]
    pub fn receivers(&self) -> &[ReceiverDescriptor] {
        &self.receivers
    }

    pub fn add_sender(&mut self, sender: SenderDescriptor) {
        self.senders.push(sender);
    }

    pub fn add_receiver(&mut self, receiver: ReceiverDescriptor) {
        self.receivers.push(receiver);
    }

    #[must_use]
    pub fn has_work(&self) -> bool {
        !self.senders.is_empty() || !self.receivers.is_empty()
    }

    pub fn clear(&mut self) {
        self.senders.clear();
        self.receivers.clear();
    }

    /// One kernel per attached descriptor, senders first.
    #[must_use]
    pub fn build_program(&self, test_name: &str) -> Program {
        let mut program = Program::new(&format!("{test_name}@chip{}", self.chip_id));
        for sender in &self.senders {
            program.add_kernel(KernelConfig {
                kernel_src: sender.kernel_src.clone(),
                core: sender.src_core,
                runtime_args: sender_runtime_args(sender),
            });
        }
        for receiver in &self.receivers {
            program.add_kernel(KernelConfig {
                kernel_src: receiver.kernel_src.clone(),
                core: receiver.core,
                runtime_args: receiver_runtime_args(receiver),
            });
        }
        program
    }
}

fn split_address(addr: u64) -> [u32; 2] {
    [addr as u32, (addr >> 32) as u32]
}

fn chip_send_type_arg(chip_send_type: ChipSendType) -> u32 {
    match chip_send_type {
        ChipSendType::Unicast => 0,
        ChipSendType::Multicast => 1,
    }
}

fn noc_send_type_arg(noc_send_type: NocSendType) -> u32 {
    match noc_send_type {
        NocSendType::UnicastWrite => 0,
        NocSendType::UnicastAtomicInc => 1,
        NocSendType::FusedUnicastAtomicInc => 2,
    }
}

/// Sender kernel arguments:
///
/// ```txt
///  sender_id, chip_send_type, noc_send_type, num_packets, payload_size,
///  target_address_lo, target_address_hi, receiver_noc_encoding,
///  hops_north, hops_south, hops_east, hops_west
/// ```
fn sender_runtime_args(sender: &SenderDescriptor) -> Vec<u32> {
    let data = &sender.data_config;
    let [addr_lo, addr_hi] = split_address(sender.target_address);
    let mut args = vec![
        sender.sender_id.0,
        chip_send_type_arg(data.chip_send_type),
        noc_send_type_arg(data.noc_send_type),
        data.num_packets,
        data.payload_size_bytes,
        addr_lo,
        addr_hi,
        sender.receiver_noc_encoding,
    ];
    args.extend(
        RoutingDirection::ALL
            .iter()
            .map(|direction| sender.hops.get(direction).copied().unwrap_or(0)),
    );
    args
}

/// Receiver kernel arguments:
///
/// ```txt
///  sender_id, noc_send_type, num_packets, payload_size,
///  target_address_lo, target_address_hi
/// ```
fn receiver_runtime_args(receiver: &ReceiverDescriptor) -> Vec<u32> {
    let data = &receiver.data_config;
    let [addr_lo, addr_hi] = split_address(receiver.target_address);
    vec![
        receiver.sender_id.0,
        noc_send_type_arg(data.noc_send_type),
        data.num_packets,
        data.payload_size_bytes,
        addr_lo,
        addr_hi,
    ]
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use fabtest_device::CoreCoord;
    use fabtest_topology::HopMap;
    use fabtest_traffic::{SenderId, TrafficDataConfig};

    use super::*;

    fn data() -> Rc<TrafficDataConfig> {
        Rc::new(TrafficDataConfig {
            chip_send_type: ChipSendType::Unicast,
            noc_send_type: NocSendType::UnicastAtomicInc,
            num_packets: 8,
            payload_size_bytes: 256,
        })
    }

    #[test]
    fn program_from_descriptors() {
        let mut device = TestDevice::new(ChipId(3));
        assert!(!device.has_work());

        device.add_sender(SenderDescriptor {
            sender_id: SenderId(7),
            src_chip_id: ChipId(3),
            src_core: CoreCoord::new(1, 1),
            data_config: data(),
            dst_chip_ids: vec![ChipId(4)],
            hops: HopMap::from([(RoutingDirection::East, 1)]),
            route: vec![ChipId(4)],
            target_address: 0x1_0000_0040,
            receiver_noc_encoding: 0x41,
            kernel_src: "send.cpp".to_string(),
        });
        device.add_receiver(ReceiverDescriptor {
            sender_id: SenderId(2),
            chip_id: ChipId(3),
            core: CoreCoord::new(0, 0),
            data_config: data(),
            target_address: 0x80,
            kernel_src: "recv.cpp".to_string(),
        });
        assert!(device.has_work());

        let program = device.build_program("unicast");
        assert_eq!(program.name, "unicast@chip3");
        assert_eq!(program.kernels.len(), 2);

        let sender = &program.kernels[0];
        assert_eq!(sender.kernel_src, "send.cpp");
        assert_eq!(sender.core, CoreCoord::new(1, 1));
        assert_eq!(
            sender.runtime_args,
            vec![7, 0, 1, 8, 256, 0x40, 0x1, 0x41, 0, 0, 1, 0]
        );

        let receiver = &program.kernels[1];
        assert_eq!(receiver.runtime_args, vec![2, 1, 8, 256, 0x80, 0]);

        device.clear();
        assert!(!device.has_work());
    }
}
