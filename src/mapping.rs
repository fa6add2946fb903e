//! Static register bank layouts for the known heat pump controller variants.
//!
//! The pCO controllers expose three register banks over modbus: analog (`A`),
//! digital (`D`) and integer (`I`). Where each bank lives in the modbus
//! address space depends on the controller firmware, so every supported
//! firmware profile gets one immutable [`BankLayout`] here. There is no
//! runtime registration: the table below is the whole universe.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown controller variant `{0}`, expected one of mt_0, mt_1, pco5_0, uPC_0")]
    UnknownVariant(String),
}

/// A controller firmware/hardware profile.
///
/// `mt_0` is the standard CAREL pCO5 firmware, `mt_1` appears to be a custom
/// uPC build shipped with some units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
pub enum ControllerVariant {
    #[strum(serialize = "mt_0")]
    Mt0,
    #[strum(serialize = "mt_1")]
    Mt1,
}

impl ControllerVariant {
    /// Resolve a variant name or a human-facing model alias.
    ///
    /// Aliases map the controller model reported by the vendor tooling onto
    /// the firmware profile (`pco5_0` is the stock pCO5, `uPC_0` the uPC).
    pub fn resolve(name: &str) -> Result<Self, Error> {
        let canonical = match name {
            "pco5_0" => "mt_0",
            "uPC_0" => "mt_1",
            other => other,
        };
        canonical
            .parse()
            .map_err(|_| Error::UnknownVariant(name.to_string()))
    }

    pub fn layout(self) -> &'static BankLayout {
        match self {
            ControllerVariant::Mt0 => &MT_0,
            ControllerVariant::Mt1 => &MT_1,
        }
    }

    pub fn all() -> [ControllerVariant; 2] {
        [ControllerVariant::Mt0, ControllerVariant::Mt1]
    }
}

/// One of the three register banks of a pCO controller.
///
/// The discriminant order is also the order in which an acquisition cycle
/// visits the banks and the order in which reading keys sort.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::EnumString,
)]
pub enum Bank {
    #[strum(serialize = "A")]
    Analog,
    #[strum(serialize = "D")]
    Digital,
    #[strum(serialize = "I")]
    Integer,
}

impl Bank {
    pub const ALL: [Bank; 3] = [Bank::Analog, Bank::Digital, Bank::Integer];
}

impl serde::Serialize for Bank {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// The modbus primitive backing a bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum BankKind {
    #[strum(serialize = "holding")]
    Holding,
    #[strum(serialize = "coil")]
    Coil,
}

/// Where one bank lives on the wire: the backing primitive and the modbus
/// offset of the bank's first register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BankWindow {
    pub kind: BankKind,
    pub start: u16,
}

/// The full per-variant mapping. Every variant defines all three banks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BankLayout {
    pub analog: BankWindow,
    pub digital: BankWindow,
    pub integer: BankWindow,
}

impl BankLayout {
    pub fn window(&self, bank: Bank) -> BankWindow {
        match bank {
            Bank::Analog => self.analog,
            Bank::Digital => self.digital,
            Bank::Integer => self.integer,
        }
    }
}

// These offsets are a wire compatibility contract with the controller
// firmware. Do not adjust them without a unit to verify against.
static MT_0: BankLayout = BankLayout {
    analog: BankWindow { kind: BankKind::Holding, start: 0 },
    digital: BankWindow { kind: BankKind::Coil, start: 0 },
    integer: BankWindow { kind: BankKind::Holding, start: 5001 },
};

static MT_1: BankLayout = BankLayout {
    analog: BankWindow { kind: BankKind::Holding, start: 2 },
    digital: BankWindow { kind: BankKind::Coil, start: 2 },
    integer: BankWindow { kind: BankKind::Holding, start: 5003 },
};
