/// Field names of the positional (array-shaped) sensor payload, by reading index.
pub const POSITIONAL_FIELDS: [&str; 12] = [
    "Timestamp",
    "Light level (lux)",
    "Loudness (dB)",
    "UV light level",
    "Pressure (mBar)",
    "Temperature (°C)",
    "Relative Humidity (%)",
    "CO2 (ppm)",
    "PM1.0 (μg/m3)",
    "PM2.5 (μg/m3)",
    "PM4.0 (μg/m3)",
    "PM10.0 (μg/m3)",
];

pub fn positional_field(index: usize) -> Option<&'static str> {
    POSITIONAL_FIELDS.get(index).copied()
}
