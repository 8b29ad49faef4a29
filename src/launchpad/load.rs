// CLASSIFICATION: COMMUNITY
// Filename: load.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Image loading for a launch context.

use cohesix_procargs::{HandleInfo, HandleType};
use log::{debug, info};

use super::{LaunchState, Launchpad};
use crate::image::LoadedImage;
use crate::kernel::Handle;
use crate::loader_svc::LoaderServiceClient;
use crate::status::Status;

impl Launchpad {
    fn record_main(&mut self, loaded: LoadedImage) {
        info!(
            "[launchpad] loaded image base=0x{:x} entry=0x{:x}",
            loaded.base, loaded.entry
        );
        self.base = loaded.base;
        self.entry = loaded.entry;
        self.advance(LaunchState::ImageLoaded);
    }

    /// Load `image` as the main program and let it run directly, ignoring
    /// any interpreter it names. The image is always closed.
    pub fn elf_load_basic(&mut self, image: Handle) -> Result<(), Status> {
        if !image.is_valid() {
            return Err(self.fail(Status::InvalidArgs, "elf_load: invalid vmo"));
        }
        self.check()?;
        let mut load = match self.env.images.start(&image) {
            Ok(load) => load,
            Err(status) => return Err(self.fail(status, "elf_load: elf_load_start() failed")),
        };
        let loaded = match load.finish(&self.root_vmar) {
            Ok(loaded) => loaded,
            Err(status) => return Err(self.fail(status, "elf_load: elf_load_finish() failed")),
        };
        self.record_main(loaded);
        if let Some(size) = load.stack_size() {
            self.set_stack_size(size);
        }
        self.loader_message = false;
        Ok(())
    }

    /// Load `image` as the main program. When it names an interpreter, the
    /// interpreter is fetched from the loader service and loaded instead,
    /// and `image` is kept to hand to it in the loader message.
    pub fn elf_load(&mut self, image: Handle) -> Result<(), Status> {
        if !image.is_valid() {
            return Err(self.fail(Status::InvalidArgs, "elf_load: invalid vmo"));
        }
        self.check()?;
        let mut load = match self.env.images.start(&image) {
            Ok(load) => load,
            Err(status) => return Err(self.fail(status, "elf_load: elf_load_start() failed")),
        };
        let interp = match load.interp() {
            Ok(interp) => interp,
            Err(status) => return Err(self.fail(status, "elf_load: get_interp() failed")),
        };
        match interp {
            None => {
                let loaded = match load.finish(&self.root_vmar) {
                    Ok(loaded) => loaded,
                    Err(status) => {
                        return Err(self.fail(status, "elf_load: elf_load_finish() failed"))
                    }
                };
                self.record_main(loaded);
                self.loader_message = false;
            }
            Some(name) => {
                if let Err(status) = self.load_interp(image, &name) {
                    return Err(self.fail(status, "elf_load: handle_interp failed"));
                }
            }
        }
        if let Some(size) = load.stack_size() {
            self.set_stack_size(size);
        }
        Ok(())
    }

    fn setup_loader_svc(&mut self) -> Result<(), Status> {
        if self.special.loader_svc.is_some() {
            return Ok(());
        }
        let connector = self.env.loader_service.as_ref().ok_or(Status::NotSupported)?;
        self.special.loader_svc = Some(connector.connect()?);
        Ok(())
    }

    fn load_interp(&mut self, image: Handle, name: &str) -> Result<(), Status> {
        self.setup_loader_svc()?;
        let channel = self.special.loader_svc.as_ref().ok_or(Status::BadState)?;
        debug!("[launchpad] fetching interpreter {name}");
        let interp =
            LoaderServiceClient::new(channel, self.env.config.loader_msg_max).load_object(name)?;
        let loaded = self
            .env
            .images
            .start(&interp)?
            .finish(&self.root_vmar)?;
        drop(interp);
        self.record_main(loaded);
        self.special.exec_vmo = Some(image);
        self.loader_message = true;
        Ok(())
    }

    /// Load `image` into the target alongside the main program. The caller
    /// keeps `image`.
    pub fn elf_load_extra(&mut self, image: &Handle) -> Result<LoadedImage, Status> {
        self.check()?;
        if !image.is_valid() {
            return Err(self.fail(Status::InvalidArgs, "elf_load_extra: invalid vmo"));
        }
        let mut load = match self.env.images.start(image) {
            Ok(load) => load,
            Err(status) => {
                return Err(self.fail(status, "elf_load_extra: elf_load_start() failed"))
            }
        };
        match load.finish(&self.root_vmar) {
            Ok(loaded) => Ok(loaded),
            Err(status) => Err(self.fail(status, "elf_load_extra: elf_load_finish() failed")),
        }
    }

    /// Load the runtime image: `image` if given, else the process-wide
    /// default. Records where it landed.
    pub fn load_runtime(&mut self, image: Option<&Handle>) -> Result<(), Status> {
        let loaded = match image {
            Some(image) => self.elf_load_extra(image)?,
            None => {
                self.check()?;
                let runtime = self.env.runtime;
                match runtime.with_image(|image| self.elf_load_extra(image)) {
                    Ok(loaded) => loaded?,
                    Err(_) => {
                        return Err(self.fail(Status::InvalidArgs, "elf_load_extra: invalid vmo"))
                    }
                }
            }
        };
        debug!("[launchpad] runtime image at 0x{:x}", loaded.base);
        self.runtime_base = loaded.base;
        Ok(())
    }

    /// Pass a duplicate of the default runtime image to the child.
    pub fn add_runtime_image(&mut self) -> Result<(), Status> {
        self.check()?;
        let image = match self.env.runtime.duplicate() {
            Ok(image) => image,
            Err(status) => return Err(self.fail(status, "add_runtime_image: no runtime image")),
        };
        self.add_handle(image, HandleInfo::new(HandleType::RuntimeImage, 0))
    }

    /// Load the main program, then the default runtime image, and hand the
    /// child a copy of the runtime image.
    pub fn load_from_image(&mut self, image: Handle) -> Result<(), Status> {
        self.elf_load(image)?;
        self.load_runtime(None)?;
        self.add_runtime_image()
    }
}
