//! Backend-neutral buffer resource description. Lives apart from
//! `command` because it describes creation-time state, not a recorded
//! operation.

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsageFlags: u32 {
        const VERTEX       = 1 << 0;
        const INDEX        = 1 << 1;
        const UNIFORM      = 1 << 2;
        const STORAGE      = 1 << 3;
        const INDIRECT     = 1 << 4;
        const TRANSFER_SRC = 1 << 5;
        const TRANSFER_DST = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor {
    pub size: u64,
    pub usage: BufferUsageFlags,
    pub label: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_flags_compose() {
        let usage = BufferUsageFlags::VERTEX | BufferUsageFlags::TRANSFER_DST;
        assert!(usage.contains(BufferUsageFlags::VERTEX));
        assert!(!usage.contains(BufferUsageFlags::INDEX));
    }
}
