use zbus::fdo;
use zbus::interface;

use crate::actor::{ActorError, ActorHandle};
use crate::profile::PlatformProfile;

/* The org.freedesktop.galaxybook1.PlatformProfile interface. */
/*  */
/* Profiles are exchanged by name: low-power, quiet, balanced, */
/* balanced-performance and performance. */
pub struct GalaxybookProfile {
    handle: ActorHandle,
    choices: Vec<PlatformProfile>,
}

impl GalaxybookProfile {
    pub fn new(handle: ActorHandle, choices: Vec<PlatformProfile>) -> Self {
        Self { handle, choices }
    }
}

#[interface(name = "org.freedesktop.galaxybook1.PlatformProfile")]
impl GalaxybookProfile {
    #[zbus(property)]
    async fn profile(&self) -> fdo::Result<String> {
        Ok(self.handle.profile().await?.name().to_string())
    }

    #[zbus(property)]
    async fn set_profile(&self, name: String) -> fdo::Result<()> {
        let profile = name.parse::<PlatformProfile>().map_err(ActorError::from)?;
        Ok(self.handle.set_profile(profile).await?)
    }

    /* Supported profiles, lowest power first. */
    #[zbus(property)]
    async fn choices(&self) -> Vec<String> {
        self.choices.iter().map(|p| p.name().to_string()).collect()
    }

    /* Switch to the next supported profile and return its name. */
    async fn cycle(&self) -> fdo::Result<String> {
        Ok(self.handle.cycle_profile().await?.name().to_string())
    }
}
