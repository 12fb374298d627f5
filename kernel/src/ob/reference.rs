//! Reference Counting and Deferred Deletion
//!
//! # Counts
//! - Pointer count: every holder of a body, including every handle
//! - Handle count: open handles, maintained by the handle layer through
//!   `increment_handle_count` / `decrement_handle_count`
//!
//! # Deletion
//! When the pointer count of a temporary object reaches zero the object is
//! claimed (DEFER_DELETE, exactly one winner) and pushed on the reap list, a
//! lock-free LIFO linked through `next_to_free`. The push that finds the list
//! empty queues the reaper work item. The reaper swaps the whole list out and
//! deletes every entry, repeating until it finds the list empty.
//!
//! Deletion never runs in the caller of `dereference_object`.

use core::ptr::{self, NonNull};
use core::sync::atomic::Ordering;

use super::header::{
    HandleCountState, ObjectBody, ObjectHandleCountDatabase, ObjectHandleCountEntry, ObjectHeader,
    ObjectHeaderFlags, ObjectHeaderHandleInfo,
};
use super::manager::ObjectManager;
use super::object_type::{ObjectType, OpenReason};
use super::services::{AccessMask, Handle, HandleInformation};
use crate::ke::ProcessorMode;
use crate::mm::pool::{pool_tags, PoolType};
use crate::se::{SecurityOperation, SE_CREATE_PERMANENT_PRIVILEGE};
use crate::status::{NtResult, NtStatus};

fn header_of<'a>(body: ObjectBody) -> &'a ObjectHeader {
    // SAFETY: callers hold a reference, so the header outlives the borrow
    unsafe { &*body.header().as_ptr() }
}

impl ObjectManager {
    /// ObReferenceObject()
    pub fn reference_object(&self, body: ObjectBody) {
        header_of(body).increment_pointer_count();
    }

    /// ObReferenceObjectByHandle(): resolve a handle and take a reference
    pub fn reference_object_by_handle(
        &self,
        handle: Handle,
        desired_access: AccessMask,
        mode: ProcessorMode,
    ) -> NtResult<(ObjectBody, HandleInformation)> {
        let (body, info) = self.services.resolve_handle(handle, desired_access, mode)?;
        self.reference_object(body);
        Ok((body, info))
    }

    /// ObDereferenceObject()
    ///
    /// The caller must not touch `body` afterwards unless it holds another
    /// reference.
    pub fn dereference_object(&self, body: ObjectBody) {
        let header = header_of(body);
        let count = header.decrement_pointer_count();

        if count > 0 {
            return;
        }
        if count < 0 {
            log::error!("[OB] Pointer count underflow on {:p}", body.as_ptr());
            return;
        }
        if header.is_permanent() {
            return;
        }

        self.queue_deferred_delete(body.header());
    }

    /// Claim an object for deletion and push it on the reap list
    fn queue_deferred_delete(&self, header: NonNull<ObjectHeader>) {
        // SAFETY: the object is alive until the reaper frees it
        let header_ref = unsafe { header.as_ref() };

        if header_ref.set_flags(ObjectHeaderFlags::DEFER_DELETE).contains(ObjectHeaderFlags::DEFER_DELETE) {
            return;
        }

        let mut head = self.reap_list.load(Ordering::Relaxed);
        loop {
            header_ref.next_to_free.store(head, Ordering::Relaxed);
            match self
                .reap_list
                .compare_exchange_weak(head, header.as_ptr(), Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }

        if head.is_null() {
            self.work_queues.queue_work_item(&self.reaper_item, self.config.reaper_queue);
        }
    }

    /// ObpReapObject(): the reaper work routine
    pub(crate) fn reap_objects(&self) {
        self.reaper_passes.fetch_add(1, Ordering::Relaxed);

        loop {
            let mut next = self.reap_list.swap(ptr::null_mut(), Ordering::Acquire);
            if next.is_null() {
                break;
            }

            while let Some(header) = NonNull::new(next) {
                // SAFETY: entries on the reap list are claimed and unreferenced
                next = unsafe { header.as_ref() }.next_to_free.load(Ordering::Relaxed);
                unsafe { self.delete_object(header) };
            }
        }
    }

    /// Run pending reaper work, returning the number of work items run
    pub fn process_deferred_deletes(&self) -> usize {
        self.work_queues.process_work_items(self.config.reaper_queue, usize::MAX)
    }

    pub fn reap_list_is_empty(&self) -> bool {
        self.reap_list.load(Ordering::Acquire).is_null()
    }

    /// ObMakeTemporaryObject()
    ///
    /// An unreferenced object is queued for deletion at once.
    pub fn make_temporary_object(&self, body: ObjectBody, mode: ProcessorMode) -> NtResult<()> {
        if !mode.is_kernel() && !self.services.single_privilege_check(SE_CREATE_PERMANENT_PRIVILEGE, mode) {
            return Err(NtStatus::PrivilegeNotHeld);
        }

        let header = header_of(body);
        header.clear_flags(ObjectHeaderFlags::PERMANENT);

        // A racing zero crossing may queue too; DEFER_DELETE admits only one
        if header.pointer_count() == 0 && header.handle_count() == 0 {
            self.queue_deferred_delete(body.header());
        }
        Ok(())
    }

    /// ObMakePermanentObject()
    pub fn make_permanent_object(&self, body: ObjectBody, mode: ProcessorMode) -> NtResult<()> {
        if !mode.is_kernel() && !self.services.single_privilege_check(SE_CREATE_PERMANENT_PRIVILEGE, mode) {
            return Err(NtStatus::PrivilegeNotHeld);
        }
        header_of(body).set_flags(ObjectHeaderFlags::PERMANENT);
        Ok(())
    }

    /// ObpIncrementHandleCount(): account for a new handle to `body`
    ///
    /// The handle takes a pointer reference of its own.
    pub fn increment_handle_count(
        &self,
        body: ObjectBody,
        reason: OpenReason,
        process: usize,
        granted_access: AccessMask,
    ) -> NtResult<()> {
        let header = header_of(body);
        let object_type = header.object_type().ok_or(NtStatus::InvalidParameter)?;

        let process_count = match header.handle_info() {
            // SAFETY: Handle Info lives as long as the header
            Some(info) => unsafe { process_handle_count(&(*info.as_ptr()).state.lock(), process) },
            None => 0,
        };

        if header.has_flag(ObjectHeaderFlags::EXCLUSIVE)
            && header.handle_count() > 0
            && process_count == 0
            && header.handle_info().is_some()
        {
            log::debug!("[OB] Exclusive object {:p} refused to process {}", body.as_ptr(), process);
            return Err(NtStatus::AccessDenied);
        }

        if let Some(open) = &object_type.type_info().open_procedure {
            open(reason, process, body, granted_access, process_count)?;
        }

        if let Some(info) = header.handle_info() {
            // SAFETY: as above
            unsafe { self.record_process_handle(info, process)? };
        }

        header.increment_handle_count();
        self.reference_object(body);
        object_type.handle_opened();
        Ok(())
    }

    /// ObpDecrementHandleCount(): account for a closed handle to `body`
    ///
    /// Drops the handle's pointer reference, which may queue deletion.
    pub fn decrement_handle_count(&self, body: ObjectBody, process: usize, granted_access: AccessMask) {
        let header = header_of(body);
        let Some(object_type) = header.object_type() else {
            return;
        };

        let system_count = header.decrement_handle_count();
        if system_count < 0 {
            log::error!("[OB] Handle count underflow on {:p}", body.as_ptr());
        }

        let process_count = match header.handle_info() {
            // SAFETY: Handle Info lives as long as the header
            Some(info) => unsafe { release_process_handle(&mut (*info.as_ptr()).state.lock(), process) },
            None => 0,
        };

        object_type.handle_closed();
        if let Some(close) = &object_type.type_info().close_procedure {
            close(process, body, granted_access, process_count, system_count);
        }

        self.dereference_object(body);
    }

    /// Count one more handle for `process` in the Handle Info state
    unsafe fn record_process_handle(&self, info: NonNull<ObjectHeaderHandleInfo>, process: usize) -> NtResult<()> {
        let mut state = (*info.as_ptr()).state.lock();

        if let Some(database) = state.database {
            let entries = &mut (*database.as_ptr()).entries;
            match entries.iter_mut().find(|e| e.process == process) {
                Some(entry) => entry.handle_count += 1,
                None => entries.push(ObjectHandleCountEntry {
                    process,
                    handle_count: 1,
                }),
            }
            return Ok(());
        }

        let single = &mut state.single_entry;
        if single.handle_count == 0 || single.process == process {
            single.process = process;
            single.handle_count += 1;
            return Ok(());
        }

        // A second process: move to a database
        let database = ObjectHandleCountDatabase {
            entries: alloc::vec![
                *single,
                ObjectHandleCountEntry {
                    process,
                    handle_count: 1,
                },
            ],
        };
        let database = self
            .pool
            .allocate_typed(PoolType::NonPagedPool, pool_tags::TAG_HANDLE_DB, database)
            .map_err(NtStatus::from)?;
        state.single_entry = ObjectHandleCountEntry::default();
        state.database = Some(database);
        Ok(())
    }

    /// Per-process handle count on an object (0 if not tracked)
    pub fn process_handle_count(&self, body: ObjectBody, process: usize) -> u32 {
        match header_of(body).handle_info() {
            // SAFETY: Handle Info lives as long as the header
            Some(info) => unsafe { process_handle_count(&(*info.as_ptr()).state.lock(), process) },
            None => 0,
        }
    }

    /// Move the captured security descriptor into the object and free the
    /// create information
    ///
    /// Called once the object is fully initialized. A second call does
    /// nothing.
    pub fn consume_create_information(&self, body: ObjectBody) -> NtResult<()> {
        let header = header_of(body);
        if !header.clear_flags(ObjectHeaderFlags::CREATE_INFO).contains(ObjectHeaderFlags::CREATE_INFO) {
            return Ok(());
        }
        let Some(info) = NonNull::new(header.object_create_info.swap(ptr::null_mut(), Ordering::AcqRel)) else {
            return Ok(());
        };

        // SAFETY: the header owned the record until the swap above
        let descriptor = unsafe { (*info.as_ptr()).security_descriptor.take() };
        let mut result = Ok(());

        if let Some(descriptor) = descriptor {
            result = self.assign_security_descriptor(body, header, descriptor);
        }

        // SAFETY: nothing else refers to the record
        unsafe { self.free_create_information(info) };
        result
    }

    fn assign_security_descriptor(
        &self,
        body: ObjectBody,
        header: &ObjectHeader,
        descriptor: alloc::boxed::Box<crate::se::CapturedSecurityDescriptor>,
    ) -> NtResult<()> {
        let Some(security) = header
            .object_type()
            .and_then(|t: &ObjectType| t.type_info().security_procedure.clone())
        else {
            return Ok(());
        };

        let mut slot = header.security_descriptor.lock();
        security(body, SecurityOperation::AssignSecurityDescriptor(descriptor), &mut *slot)?;
        if slot.is_some() {
            header.set_flags(ObjectHeaderFlags::SECURITY);
        }
        Ok(())
    }
}

fn process_handle_count(state: &HandleCountState, process: usize) -> u32 {
    match state.database {
        // SAFETY: the database is owned by the state
        Some(database) => unsafe { &(*database.as_ptr()).entries }
            .iter()
            .find(|e| e.process == process)
            .map_or(0, |e| e.handle_count),
        None if state.single_entry.process == process => state.single_entry.handle_count,
        None => 0,
    }
}

/// Drop one handle for `process`, returning its remaining count
fn release_process_handle(state: &mut HandleCountState, process: usize) -> u32 {
    if let Some(database) = state.database {
        // SAFETY: the database is owned by the state
        let entries = unsafe { &mut (*database.as_ptr()).entries };
        if let Some(position) = entries.iter().position(|e| e.process == process) {
            let entry = &mut entries[position];
            entry.handle_count = entry.handle_count.saturating_sub(1);
            let remaining = entry.handle_count;
            if remaining == 0 {
                entries.swap_remove(position);
            }
            return remaining;
        }
        return 0;
    }

    let single = &mut state.single_entry;
    if single.process == process && single.handle_count > 0 {
        single.handle_count -= 1;
        return single.handle_count;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ob::attributes::{ObjectAttributeFlags, ObjectAttributes};
    use crate::ob::object_type::{ObjectTypeInitializer, TypeRef};
    use crate::ob::testing::test_manager;
    use crate::rtl::UnicodeString;
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use core::sync::atomic::AtomicUsize;

    fn counting_type(ob: &ObjectManager, name: &str, deletes: &Arc<AtomicUsize>) -> TypeRef {
        let counter = Arc::clone(deletes);
        ob.create_object_type(
            name,
            ObjectTypeInitializer {
                maintain_handle_count: true,
                delete_procedure: Some(Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_deferred_delete_runs_on_reaper() {
        let (ob, _services) = test_manager();
        let deletes = Arc::new(AtomicUsize::new(0));
        let event = counting_type(&ob, "Event", &deletes);
        let body = ob.create_test_object(event, Some("Deferred")).unwrap();

        ob.dereference_object(body);
        // Nothing is deleted in the caller's context
        assert_eq!(deletes.load(Ordering::SeqCst), 0);
        assert!(!ob.reap_list_is_empty());
        assert!(ob.reaper_item.is_queued());

        assert_eq!(ob.process_deferred_deletes(), 1);
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
        assert!(ob.reap_list_is_empty());
        assert_eq!(event.total_objects(), 0);
    }

    #[test]
    fn test_one_reaper_item_for_many_objects() {
        let (ob, _services) = test_manager();
        let deletes = Arc::new(AtomicUsize::new(0));
        let event = counting_type(&ob, "Event", &deletes);

        let bodies: Vec<_> = (0..16).map(|_| ob.create_test_object(event, None).unwrap()).collect();
        for body in &bodies {
            ob.dereference_object(*body);
        }
        assert_eq!(ob.work_queues().depth(ob.config().reaper_queue), 1);
        assert_eq!(ob.process_deferred_deletes(), 1);
        assert_eq!(deletes.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_concurrent_release_deletes_once() {
        let (ob, _services) = test_manager();
        let deletes = Arc::new(AtomicUsize::new(0));
        let event = counting_type(&ob, "Event", &deletes);

        const OBJECTS: usize = 64;
        const THREADS: usize = 4;
        let bodies: Vec<_> = (0..OBJECTS).map(|_| ob.create_test_object(event, None).unwrap()).collect();
        for body in &bodies {
            for _ in 1..THREADS {
                ob.reference_object(*body);
            }
        }

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                let ob = &ob;
                let bodies = &bodies;
                scope.spawn(move || {
                    for body in bodies {
                        ob.dereference_object(*body);
                        ob.process_deferred_deletes();
                    }
                });
            }
        });
        ob.process_deferred_deletes();

        assert_eq!(deletes.load(Ordering::SeqCst), OBJECTS);
        assert_eq!(event.total_objects(), 0);
        assert!(ob.reap_list_is_empty());
    }

    #[test]
    fn test_reference_keeps_object_alive() {
        let (ob, _services) = test_manager();
        let deletes = Arc::new(AtomicUsize::new(0));
        let event = counting_type(&ob, "Event", &deletes);
        let body = ob.create_test_object(event, None).unwrap();

        ob.reference_object(body);
        assert_eq!(header_of(body).pointer_count(), 2);
        ob.dereference_object(body);
        ob.process_deferred_deletes();
        assert_eq!(deletes.load(Ordering::SeqCst), 0);

        ob.dereference_object(body);
        ob.process_deferred_deletes();
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_counts_and_database() {
        let (ob, _services) = test_manager();
        let deletes = Arc::new(AtomicUsize::new(0));
        let event = counting_type(&ob, "Event", &deletes);
        let body = ob.create_test_object(event, None).unwrap();

        ob.increment_handle_count(body, OpenReason::CreateHandle, 4, 0x1F0003).unwrap();
        ob.increment_handle_count(body, OpenReason::DuplicateHandle, 4, 0x1F0003).unwrap();
        assert_eq!(ob.process_handle_count(body, 4), 2);
        assert_eq!(ob.pool().tags().outstanding(pool_tags::TAG_HANDLE_DB), 0);

        // A second process moves the counts to a database
        ob.increment_handle_count(body, OpenReason::OpenHandle, 8, 0x1).unwrap();
        assert_eq!(ob.pool().tags().outstanding(pool_tags::TAG_HANDLE_DB), 1);
        assert_eq!(ob.process_handle_count(body, 4), 2);
        assert_eq!(ob.process_handle_count(body, 8), 1);

        let header = header_of(body);
        assert_eq!(header.handle_count(), 3);
        assert_eq!(header.pointer_count(), 4);
        assert_eq!(event.total_handles(), 3);

        ob.dereference_object(body);
        ob.decrement_handle_count(body, 8, 0x1);
        ob.decrement_handle_count(body, 4, 0x1F0003);
        assert_eq!(ob.process_handle_count(body, 4), 1);
        ob.decrement_handle_count(body, 4, 0x1F0003);
        assert_eq!(event.total_handles(), 0);

        ob.process_deferred_deletes();
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
        assert_eq!(ob.pool().tags().outstanding(pool_tags::TAG_HANDLE_DB), 0);
    }

    #[test]
    fn test_open_and_close_procedures() {
        let (ob, _services) = test_manager();
        let opens = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let (o, c) = (Arc::clone(&opens), Arc::clone(&closes));
        let event = ob
            .create_object_type(
                "Event",
                ObjectTypeInitializer {
                    open_procedure: Some(Arc::new(move |reason, _, _, _, _| {
                        if reason == OpenReason::InheritHandle {
                            return Err(NtStatus::AccessDenied);
                        }
                        o.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })),
                    close_procedure: Some(Arc::new(move |_, _, _, _, system_count| {
                        assert!(system_count >= 0);
                        c.fetch_add(1, Ordering::SeqCst);
                    })),
                    ..Default::default()
                },
            )
            .unwrap();
        let body = ob.create_test_object(event, None).unwrap();

        ob.increment_handle_count(body, OpenReason::CreateHandle, 1, 0).unwrap();
        assert_eq!(
            ob.increment_handle_count(body, OpenReason::InheritHandle, 2, 0),
            Err(NtStatus::AccessDenied)
        );
        assert_eq!(header_of(body).handle_count(), 1);

        ob.decrement_handle_count(body, 1, 0);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        ob.dereference_object(body);
        ob.process_deferred_deletes();
    }

    #[test]
    fn test_exclusive_object() {
        let (ob, _services) = test_manager();
        let event = ob
            .create_object_type(
                "Event",
                ObjectTypeInitializer {
                    maintain_handle_count: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let chars: Vec<u16> = "Solo".encode_utf16().collect();
        let name = UnicodeString::from_slice(&chars);
        let attributes = ObjectAttributes::new(Some(&name), ObjectAttributeFlags::EXCLUSIVE, 0, None);
        let body = unsafe {
            ob.create_object(ProcessorMode::KernelMode, event, &attributes, ProcessorMode::KernelMode, 8, 0, 0)
        }
        .unwrap();

        ob.increment_handle_count(body, OpenReason::CreateHandle, 1, 0).unwrap();
        ob.increment_handle_count(body, OpenReason::OpenHandle, 1, 0).unwrap();
        assert_eq!(
            ob.increment_handle_count(body, OpenReason::OpenHandle, 2, 0),
            Err(NtStatus::AccessDenied)
        );

        ob.decrement_handle_count(body, 1, 0);
        ob.decrement_handle_count(body, 1, 0);
        ob.dereference_object(body);
        ob.process_deferred_deletes();
        assert_eq!(event.total_objects(), 0);
    }

    #[test]
    fn test_make_permanent_requires_privilege() {
        let (ob, services) = test_manager();
        let event = ob.create_object_type("Event", ObjectTypeInitializer::default()).unwrap();
        let body = ob.create_test_object(event, None).unwrap();

        assert_eq!(
            ob.make_permanent_object(body, ProcessorMode::UserMode),
            Err(NtStatus::PrivilegeNotHeld)
        );
        services.grant_privilege(SE_CREATE_PERMANENT_PRIVILEGE);
        ob.make_permanent_object(body, ProcessorMode::UserMode).unwrap();

        ob.dereference_object(body);
        ob.process_deferred_deletes();
        assert_eq!(event.total_objects(), 1);

        ob.make_temporary_object(body, ProcessorMode::UserMode).unwrap();
        ob.process_deferred_deletes();
        assert_eq!(event.total_objects(), 0);
    }

    #[test]
    fn test_repeated_make_temporary_queues_once() {
        let (ob, _services) = test_manager();
        let deletes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&deletes);
        let event = ob
            .create_object_type(
                "Event",
                ObjectTypeInitializer {
                    delete_procedure: Some(Arc::new(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })),
                    ..Default::default()
                },
            )
            .unwrap();
        let body = ob.create_test_object(event, None).unwrap();
        ob.make_permanent_object(body, ProcessorMode::KernelMode).unwrap();
        ob.dereference_object(body);
        let deleted_before = ob.stats().objects_deleted;

        // Both calls see zero counts before the reaper runs
        ob.make_temporary_object(body, ProcessorMode::KernelMode).unwrap();
        ob.make_temporary_object(body, ProcessorMode::KernelMode).unwrap();
        ob.process_deferred_deletes();

        assert_eq!(deletes.load(Ordering::SeqCst), 1);
        assert_eq!(ob.stats().objects_deleted, deleted_before + 1);
        assert!(ob.reap_list_is_empty());
        assert_eq!(event.total_objects(), 0);
    }

    #[test]
    fn test_consume_create_information_is_idempotent() {
        let (ob, _services) = test_manager();
        let event = ob.create_object_type("Event", ObjectTypeInitializer::default()).unwrap();
        let body = ob.create_test_object(event, None).unwrap();
        assert_eq!(ob.pool().tags().outstanding(pool_tags::TAG_CREATE_INFO), 1);

        ob.consume_create_information(body).unwrap();
        ob.consume_create_information(body).unwrap();
        assert_eq!(ob.pool().tags().outstanding(pool_tags::TAG_CREATE_INFO), 0);
        assert!(!header_of(body).has_flag(ObjectHeaderFlags::SECURITY));

        ob.dereference_object(body);
        ob.process_deferred_deletes();
    }
}
