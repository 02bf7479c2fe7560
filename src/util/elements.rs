//! Element table: covalent radii (Pyykkö single-bond, Å) and CPK colors.

use glam::Vec3;

/// Static data of one chemical element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementData {
    /// Atomic number.
    pub number: u8,
    /// Chemical symbol.
    pub symbol: &'static str,
    /// Covalent radius in Å.
    pub covalent_radius: f32,
    /// CPK color.
    pub color: Vec3,
}

const ELEMENTS: &[(u8, &str, f32, u32)] = &[
    (1, "H", 0.32, 0xFFFFFF),
    (2, "He", 0.46, 0xD9FFFF),
    (3, "Li", 1.33, 0xCC80FF),
    (4, "Be", 1.02, 0xC2FF00),
    (5, "B", 0.85, 0xFFB5B5),
    (6, "C", 0.75, 0x909090),
    (7, "N", 0.71, 0x3050F8),
    (8, "O", 0.63, 0xFF0D0D),
    (9, "F", 0.64, 0x90E050),
    (10, "Ne", 0.67, 0xB3E3F5),
    (11, "Na", 1.55, 0xAB5CF2),
    (12, "Mg", 1.39, 0x8AFF00),
    (13, "Al", 1.26, 0xBFA6A6),
    (14, "Si", 1.16, 0xF0C8A0),
    (15, "P", 1.11, 0xFF8000),
    (16, "S", 1.03, 0xFFFF30),
    (17, "Cl", 0.99, 0x1FF01F),
    (18, "Ar", 0.96, 0x80D1E3),
    (19, "K", 1.96, 0x8F40D4),
    (20, "Ca", 1.71, 0x3DFF00),
    (21, "Sc", 1.48, 0xE6E6E6),
    (22, "Ti", 1.36, 0xBFC2C7),
    (23, "V", 1.34, 0xA6A6AB),
    (24, "Cr", 1.22, 0x8A99C7),
    (25, "Mn", 1.19, 0x9C7AC7),
    (26, "Fe", 1.16, 0xE06633),
    (27, "Co", 1.11, 0xF090A0),
    (28, "Ni", 1.10, 0x50D050),
    (29, "Cu", 1.12, 0xC88033),
    (30, "Zn", 1.18, 0x7D80B0),
    (31, "Ga", 1.24, 0xC28F8F),
    (32, "Ge", 1.21, 0x668F8F),
    (33, "As", 1.21, 0xBD80E3),
    (34, "Se", 1.16, 0xFFA100),
    (35, "Br", 1.14, 0xA62929),
    (36, "Kr", 1.17, 0x5CB8D1),
    (45, "Rh", 1.25, 0x0A7D8C),
    (46, "Pd", 1.20, 0x006985),
    (47, "Ag", 1.28, 0xC0C0C0),
    (77, "Ir", 1.22, 0x175487),
    (78, "Pt", 1.23, 0xD0D0E0),
    (79, "Au", 1.24, 0xFFD123),
];

/// Radius and color used for elements missing from the table.
pub const UNKNOWN_ELEMENT: ElementData = ElementData {
    number: 0,
    symbol: "X",
    covalent_radius: 1.0,
    color: Vec3::new(1.0, 0.08, 0.58),
};

fn hex_to_rgb(hex: u32) -> Vec3 {
    let channel = |shift: u32| ((hex >> shift) & 0xFF) as f32 / 255.0;
    Vec3::new(channel(16), channel(8), channel(0))
}

fn from_row(
    &(number, symbol, covalent_radius, color): &(u8, &'static str, f32, u32),
) -> ElementData {
    ElementData {
        number,
        symbol,
        covalent_radius,
        color: hex_to_rgb(color),
    }
}

/// Look up an element by symbol, ignoring ASCII case.
#[must_use]
pub fn by_symbol(symbol: &str) -> Option<ElementData> {
    ELEMENTS
        .iter()
        .find(|(_, s, _, _)| s.eq_ignore_ascii_case(symbol))
        .map(from_row)
}

/// Look up an element by atomic number.
#[must_use]
pub fn by_number(number: u8) -> Option<ElementData> {
    ELEMENTS.iter().find(|(n, ..)| *n == number).map(from_row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_agree() {
        let oxygen = by_symbol("o").unwrap();
        assert_eq!(oxygen.number, 8);
        assert_eq!(by_number(8), Some(oxygen));
        assert!((oxygen.covalent_radius - 0.63).abs() < 1e-6);
        assert_eq!(oxygen.color.x, 1.0);
    }

    #[test]
    fn unknown_symbols_miss() {
        assert_eq!(by_symbol("Zz"), None);
        assert_eq!(by_number(0), None);
    }
}
