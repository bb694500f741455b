//! One-shot sensor maintenance commands

use lynx_sensor::{Driver, LinkOpener};
use tracing::info;

use crate::config::SensorConfig;
use crate::error::Result;

/// Delete every template stored on the sensor
pub fn clear_templates<O: LinkOpener>(config: &SensorConfig, opener: O) -> Result<()> {
    let mut driver = Driver::new(opener, config.driver_config());
    driver.connect()?;
    driver.clear_database()?;
    info!("Sensor template database cleared");
    Ok(())
}

/// Number of templates stored on the sensor
pub fn count_templates<O: LinkOpener>(config: &SensorConfig, opener: O) -> Result<u16> {
    let mut driver = Driver::new(opener, config.driver_config());
    driver.connect()?;
    Ok(driver.template_count()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DaemonError;
    use lynx_sensor::{SensorError, SimulatedSensor};

    fn seeded(templates: u8) -> SimulatedSensor {
        let sim = SimulatedSensor::new();
        for seed in 0..templates {
            sim.enroll_template(vec![seed; 32]).unwrap();
        }
        sim
    }

    #[test]
    fn test_count_reports_stored_templates() {
        let sim = seeded(3);
        let count = count_templates(&SensorConfig::default(), sim.opener()).unwrap();
        assert_eq!(count, 3);
        assert_eq!(sim.open_links(), 0);
    }

    #[test]
    fn test_clear_empties_the_device() {
        let sim = seeded(2);
        clear_templates(&SensorConfig::default(), sim.opener()).unwrap();
        assert_eq!(sim.template_count(), 0);
        assert_eq!(count_templates(&SensorConfig::default(), sim.opener()).unwrap(), 0);
    }

    #[test]
    fn test_unreachable_sensor_is_an_error() {
        let sim = seeded(1);
        sim.set_unplugged(true);

        let err = clear_templates(&SensorConfig::default(), sim.opener()).unwrap_err();
        assert!(matches!(err, DaemonError::Sensor(SensorError::Connection(_))));
        assert_eq!(sim.template_count(), 1);
    }
}
