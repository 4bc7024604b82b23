use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    AC = 0,
    AX = 1,
    BX = 2,
    CX = 3,
    DX = 4,
}

impl Register {
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for Register {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AC" => Ok(Self::AC),
            "AX" => Ok(Self::AX),
            "BX" => Ok(Self::BX),
            "CX" => Ok(Self::CX),
            "DX" => Ok(Self::DX),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One core's register bank.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    inner: [i32; 5],
}

impl Registers {
    pub fn read(&self, reg: Register) -> i32 {
        self.inner[reg.index()]
    }

    pub fn write(&mut self, reg: Register, value: i32) {
        self.inner[reg.index()] = value;
    }

    pub fn to_array(&self) -> [i32; 5] {
        self.inner
    }
}

impl From<[i32; 5]> for Registers {
    fn from(inner: [i32; 5]) -> Self {
        Self { inner }
    }
}

/// Condition flags. Only `zero` is driven by instructions; the others are
/// kept for layout compatibility.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub zero: bool,
    pub sign: bool,
    pub carry: bool,
    pub overflow: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_names() {
        assert_eq!("ax".parse::<Register>(), Ok(Register::AX));
        assert_eq!("DX".parse::<Register>(), Ok(Register::DX));
        assert_eq!("EX".parse::<Register>(), Err(()));
        assert_eq!(Register::AC.to_string(), "AC");
    }

    #[test]
    fn test_register_bank() {
        let mut registers = Registers::default();
        registers.write(Register::CX, -5);

        assert_eq!(registers.read(Register::CX), -5);
        assert_eq!(registers.to_array(), [0, 0, 0, -5, 0]);
        assert_eq!(Registers::from([1, 2, 3, 4, 5]).read(Register::DX), 5);
    }
}
