pub mod block;
pub mod input;

use crate::KernelConfig;

pub fn init(config: &KernelConfig) {
    if config.swap_sectors > 0 {
        let dev = block::BlockDevice::new("swap0", config.swap_sectors);
        block::register(block::BlockRole::Swap, dev);
    }
}
