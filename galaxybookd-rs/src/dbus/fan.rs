use zbus::fdo;
use zbus::interface;

use crate::actor::ActorHandle;
use crate::fan::Fan;

/* The org.freedesktop.galaxybook1.Fan interface, one object per fan. */
pub struct GalaxybookFan {
    handle: ActorHandle,
    index: usize,
    fan: Fan,
}

impl GalaxybookFan {
    pub fn new(handle: ActorHandle, index: usize, fan: Fan) -> Self {
        Self { handle, index, fan }
    }
}

fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[interface(name = "org.freedesktop.galaxybook1.Fan")]
impl GalaxybookFan {
    #[zbus(property)]
    async fn label(&self) -> String {
        self.fan.label.clone()
    }

    /* "_FST" or "FANS", depending on where the speed is read from. */
    #[zbus(property)]
    async fn source(&self) -> String {
        self.fan.source.name().to_string()
    }

    /* Corrected RPM per speed level; empty for `_FST` fans. */
    #[zbus(property)]
    async fn levels(&self) -> Vec<u32> {
        self.fan.levels().into_iter().map(saturate).collect()
    }

    #[zbus(property)]
    async fn rpm(&self) -> fdo::Result<u32> {
        Ok(saturate(self.handle.fan_rpm(self.index).await?))
    }
}
