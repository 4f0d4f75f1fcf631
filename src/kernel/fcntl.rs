use bitflags::bitflags;

bitflags! {
    // Decoded open(2) mode bits. The raw syscall argument packs access mode
    // and option bits the xv6 way (RDONLY=0, WRONLY=1, RDWR=2, CREATE=0x200,
    // TRUNC=0x400); from_usize() unpacks that into independent flags so
    // read/write access can be queried and built up independently of the
    // on-the-wire encoding.
    #[derive(Default)]
    pub struct OMode: usize {
        const READ   = 0b0001;
        const WRITE  = 0b0010;
        const CREATE = 0b0100;
        const TRUNC  = 0b1000;
    }
}

impl OMode {
    pub fn new() -> Self {
        Self::empty()
    }

    pub fn from_usize(bits: usize) -> Self {
        let mut mode = match bits & 0x3 {
            0 => Self::READ,
            1 => Self::WRITE,
            _ => Self::READ | Self::WRITE,
        };
        if bits & 0x200 != 0 {
            mode.insert(Self::CREATE);
        }
        if bits & 0x400 != 0 {
            mode.insert(Self::TRUNC);
        }
        mode
    }

    pub fn is_rdonly(&self) -> bool {
        self.contains(Self::READ) && !self.contains(Self::WRITE)
    }

    pub fn is_read(&self) -> bool {
        self.contains(Self::READ)
    }

    pub fn is_write(&self) -> bool {
        self.contains(Self::WRITE)
    }

    pub fn is_create(&self) -> bool {
        self.contains(Self::CREATE)
    }

    pub fn is_trunc(&self) -> bool {
        self.contains(Self::TRUNC)
    }

    // Chainable setters, used to build a mode for one end of a pipe.
    pub fn read(&mut self, on: bool) -> &mut Self {
        self.set(Self::READ, on);
        self
    }

    pub fn write(&mut self, on: bool) -> &mut Self {
        self.set(Self::WRITE, on);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_access_mode() {
        assert!(OMode::from_usize(0).is_read());
        assert!(!OMode::from_usize(0).is_write());
        assert!(OMode::from_usize(0).is_rdonly());

        assert!(OMode::from_usize(1).is_write());
        assert!(!OMode::from_usize(1).is_read());

        assert!(OMode::from_usize(2).is_read());
        assert!(OMode::from_usize(2).is_write());
        assert!(!OMode::from_usize(2).is_rdonly());
    }

    #[test]
    fn decodes_create_and_trunc_bits() {
        let m = OMode::from_usize(0x200 | 1);
        assert!(m.is_create());
        assert!(!m.is_trunc());
        assert!(m.is_write());

        let m = OMode::from_usize(0x400);
        assert!(m.is_trunc());
        assert!(!m.is_create());
        assert!(m.is_rdonly());
    }

    #[test]
    fn pipe_mode_builder_is_independent_of_syscall_encoding() {
        let mut m = OMode::new();
        m.read(true).write(false);
        assert!(m.is_read());
        assert!(!m.is_write());
    }
}
