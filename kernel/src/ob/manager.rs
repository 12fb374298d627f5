//! Object Manager State
//!
//! `ObjectManager` owns everything the object manager keeps between calls:
//! the pool it allocates from, the work queues the reaper runs on, the reap
//! list, the registered types and the namespace roots. Operations are split
//! across the sibling modules, each adding its own `impl ObjectManager`.
//!
//! # Initialization
//! 1. Type of types ("Type"), which is its own type
//! 2. "Directory" and "SymbolicLink"
//! 3. `\` and `\ObjectTypes`, with every type created so far filed in the
//!    latter (unless disabled in `ObConfig`)

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use spin::RwLock;

use super::config::ObConfig;
use super::directory::{directory_type_initializer, ObjectDirectory};
use super::header::ObjectHeader;
use super::object_type::{ObjectType, ObjectTypeInitializer, TypeRef, TYPE_TYPE_NAME};
use super::services::KernelServices;
use super::symlink::symbolic_link_type_initializer;
use crate::ex::worker::{WorkQueueItem, WorkQueues};
use crate::ke::KEvent;
use crate::mm::pool::{PoolAllocator, PoolStats, PoolType};
use crate::status::NtResult;

/// Full access to a type object
pub const OBJECT_TYPE_ALL_ACCESS: u32 = 0x000F_0001;

/// Object manager counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObStats {
    pub objects_created: usize,
    pub objects_deleted: usize,
    pub reaper_passes: usize,
    pub pool: PoolStats,
}

/// The object manager
pub struct ObjectManager {
    pub(crate) config: ObConfig,
    pub(crate) services: Arc<dyn KernelServices>,
    pub(crate) pool: PoolAllocator,
    pub(crate) work_queues: WorkQueues,
    /// Objects awaiting deletion, linked through `next_to_free`
    pub(crate) reap_list: AtomicPtr<ObjectHeader>,
    pub(crate) reaper_item: Arc<WorkQueueItem>,
    /// Shared wait target for types with `use_default_object`
    pub(crate) default_event: KEvent,
    type_object_type: AtomicPtr<ObjectType>,
    directory_type: AtomicPtr<ObjectType>,
    symbolic_link_type: AtomicPtr<ObjectType>,
    pub(crate) types: RwLock<Vec<TypeRef>>,
    pub(crate) root_directory: AtomicPtr<ObjectDirectory>,
    pub(crate) type_directory: AtomicPtr<ObjectDirectory>,
    pub(crate) objects_created: AtomicUsize,
    pub(crate) objects_deleted: AtomicUsize,
    pub(crate) reaper_passes: AtomicUsize,
}

impl ObjectManager {
    /// ObInitSystem(): build a manager and its built-in types
    pub fn new(config: ObConfig, services: Arc<dyn KernelServices>) -> NtResult<Arc<Self>> {
        let manager = Self::bare(config, services);
        manager.initialize()?;
        Ok(manager)
    }

    /// A manager with no types registered yet
    fn bare(config: ObConfig, services: Arc<dyn KernelServices>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<ObjectManager>| {
            let reaper = this.clone();
            ObjectManager {
                config,
                services,
                pool: PoolAllocator::new(),
                work_queues: WorkQueues::new(),
                reap_list: AtomicPtr::new(ptr::null_mut()),
                reaper_item: WorkQueueItem::new(alloc::boxed::Box::new(move || {
                    if let Some(manager) = reaper.upgrade() {
                        manager.reap_objects();
                    }
                })),
                default_event: KEvent::new(),
                type_object_type: AtomicPtr::new(ptr::null_mut()),
                directory_type: AtomicPtr::new(ptr::null_mut()),
                symbolic_link_type: AtomicPtr::new(ptr::null_mut()),
                types: RwLock::new(Vec::new()),
                root_directory: AtomicPtr::new(ptr::null_mut()),
                type_directory: AtomicPtr::new(ptr::null_mut()),
                objects_created: AtomicUsize::new(0),
                objects_deleted: AtomicUsize::new(0),
                reaper_passes: AtomicUsize::new(0),
            }
        })
    }

    fn initialize(&self) -> NtResult<()> {
        log::info!("[OB] Initializing Object Manager");

        self.create_object_type(
            TYPE_TYPE_NAME,
            ObjectTypeInitializer {
                valid_access_mask: OBJECT_TYPE_ALL_ACCESS,
                pool_type: PoolType::NonPagedPool,
                use_default_object: true,
                ..Default::default()
            },
        )?;

        let directory = self.create_object_type("Directory", directory_type_initializer())?;
        self.directory_type.store(directory.as_ptr() as *mut _, Ordering::Release);

        let symbolic_link = self.create_object_type("SymbolicLink", symbolic_link_type_initializer())?;
        self.symbolic_link_type.store(symbolic_link.as_ptr() as *mut _, Ordering::Release);

        if self.config.create_type_directory {
            self.create_namespace()?;
        }

        log::info!("[OB] Object Manager initialized ({} types)", self.types.read().len());
        Ok(())
    }

    fn load_type(slot: &AtomicPtr<ObjectType>) -> Option<TypeRef> {
        NonNull::new(slot.load(Ordering::Acquire)).map(TypeRef::from_ptr)
    }

    /// The type of types (None until bootstrapped)
    pub fn type_object_type(&self) -> Option<TypeRef> {
        Self::load_type(&self.type_object_type)
    }

    pub(crate) fn set_type_object_type(&self, type_ref: TypeRef) {
        self.type_object_type.store(type_ref.as_ptr() as *mut _, Ordering::Release);
    }

    pub fn directory_type(&self) -> Option<TypeRef> {
        Self::load_type(&self.directory_type)
    }

    pub fn symbolic_link_type(&self) -> Option<TypeRef> {
        Self::load_type(&self.symbolic_link_type)
    }

    pub fn config(&self) -> &ObConfig {
        &self.config
    }

    /// The pool objects are allocated from
    pub fn pool(&self) -> &PoolAllocator {
        &self.pool
    }

    pub fn work_queues(&self) -> &WorkQueues {
        &self.work_queues
    }

    pub fn stats(&self) -> ObStats {
        ObStats {
            objects_created: self.objects_created.load(Ordering::Relaxed),
            objects_deleted: self.objects_deleted.load(Ordering::Relaxed),
            reaper_passes: self.reaper_passes.load(Ordering::Relaxed),
            pool: self.pool.stats(),
        }
    }
}
