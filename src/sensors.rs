use anyhow::{Result, bail};
use async_trait::async_trait;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemperatureSensor: Send + Sync {
    async fn read_temperature(&self) -> Result<f32>;
    fn sensor_name(&self) -> Option<String> {
        None
    }
}

/// Reads the sensor and rejects values the regulator cannot use.
pub async fn read_checked(sensor: &dyn TemperatureSensor) -> Result<f32> {
    let value = sensor.read_temperature().await?;
    if !value.is_finite() {
        bail!("non-finite temperature reading {value}");
    }
    Ok(value)
}
