// ============================================================================
// Lua Scripts
// ============================================================================
//
// Every multi-step update against the queue store runs as a single
// server-side script so concurrent workers can never observe or produce a
// partial write. Two workers racing the token bucket must not overspend it;
// an enqueue must land the job, its audit record and the service counters
// together or not at all.
//
// ============================================================================

use redis::Script;

/// Token-bucket check-and-consume.
///
/// KEYS[1] = rate:bucket:{provider}
/// ARGV = capacity, refill_per_sec, requested, now_ms, ttl_s
/// Returns 1 when the tokens were consumed, 0 when refused. Tokens refill
/// continuously (fractional) and are capped at capacity; state is persisted
/// on both outcomes so refusal still advances the clock.
pub fn token_bucket_script() -> Script {
    Script::new(
        r"
        local capacity = tonumber(ARGV[1])
        local refill_per_sec = tonumber(ARGV[2])
        local requested = tonumber(ARGV[3])
        local now_ms = tonumber(ARGV[4])
        local ttl_s = tonumber(ARGV[5])

        local bucket = redis.call('HMGET', KEYS[1], 'tokens', 'last_refill_ms')
        local tokens = tonumber(bucket[1])
        local last_refill_ms = tonumber(bucket[2])
        if tokens == nil then tokens = capacity end
        if last_refill_ms == nil then last_refill_ms = now_ms end

        local elapsed_ms = now_ms - last_refill_ms
        if elapsed_ms > 0 then
            tokens = math.min(capacity, tokens + (elapsed_ms / 1000.0) * refill_per_sec)
        end

        local allowed = 0
        if tokens >= requested then
            tokens = tokens - requested
            allowed = 1
        end

        redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'last_refill_ms', now_ms)
        redis.call('EXPIRE', KEYS[1], ttl_s)
        return allowed
        ",
    )
}

/// Ready-path enqueue: dedup guard, stream append, audit record, service
/// counters and call timeline in one transaction.
///
/// KEYS = stream, dedup set, audit key, service timeline, service metrics
/// ARGV = job_id, payload, audit_json, now_ms, endpoint, recipient_count,
///        audit_ttl_s, timeline_ttl_s, dedup_ttl_s
/// Returns {entry_id, stream_depth}; {'', -1} when the job_id was already
/// enqueued inside the dedup window.
pub fn enqueue_ready_script() -> Script {
    Script::new(
        r"
        local job_id = ARGV[1]

        if redis.call('SISMEMBER', KEYS[2], job_id) == 1 then
            return {'', -1}
        end
        redis.call('SADD', KEYS[2], job_id)
        redis.call('EXPIRE', KEYS[2], tonumber(ARGV[9]))

        local entry_id = redis.call('XADD', KEYS[1], '*', 'job_id', job_id, 'job', ARGV[2])

        redis.call('SET', KEYS[3], ARGV[3], 'EX', tonumber(ARGV[7]))

        redis.call('ZADD', KEYS[4], tonumber(ARGV[4]), ARGV[4] .. '|' .. ARGV[5])
        redis.call('EXPIRE', KEYS[4], tonumber(ARGV[8]))

        redis.call('HINCRBY', KEYS[5], 'total_calls', 1)
        redis.call('HINCRBY', KEYS[5], 'total_emails', tonumber(ARGV[6]))
        redis.call('HINCRBY', KEYS[5], 'endpoint:' .. ARGV[5], 1)

        local depth = redis.call('XLEN', KEYS[1])
        return {entry_id, depth}
        ",
    )
}

/// Parked-path enqueue: same bookkeeping as the ready path, but the job
/// lands in the parked sorted set instead of a stream.
///
/// KEYS = parked zset, parked payload hash, dedup set, audit key,
///        service timeline, service metrics
/// ARGV = job_id, member, payload, due_ms, audit_json, now_ms, endpoint,
///        recipient_count, audit_ttl_s, timeline_ttl_s, dedup_ttl_s
/// Returns 1 on success, 0 on dedup refusal.
pub fn enqueue_parked_script() -> Script {
    Script::new(
        r"
        local job_id = ARGV[1]

        if redis.call('SISMEMBER', KEYS[3], job_id) == 1 then
            return 0
        end
        redis.call('SADD', KEYS[3], job_id)
        redis.call('EXPIRE', KEYS[3], tonumber(ARGV[11]))

        redis.call('ZADD', KEYS[1], tonumber(ARGV[4]), ARGV[2])
        redis.call('HSET', KEYS[2], job_id, ARGV[3])

        redis.call('SET', KEYS[4], ARGV[5], 'EX', tonumber(ARGV[9]))

        redis.call('ZADD', KEYS[5], tonumber(ARGV[6]), ARGV[6] .. '|' .. ARGV[7])
        redis.call('EXPIRE', KEYS[5], tonumber(ARGV[10]))

        redis.call('HINCRBY', KEYS[6], 'total_calls', 1)
        redis.call('HINCRBY', KEYS[6], 'total_emails', tonumber(ARGV[8]))
        redis.call('HINCRBY', KEYS[6], 'endpoint:' .. ARGV[7], 1)

        return 1
        ",
    )
}

/// Promote due parked jobs onto their ready streams.
///
/// KEYS = parked zset, parked payload hash
/// ARGV = now_ms, limit, ready stream key prefix
/// Members are '{priority}:{job_id}'; each due member is appended to
/// '{prefix}{priority}' and removed from the parked set atomically.
/// Returns the promoted job ids.
pub fn promote_due_script() -> Script {
    Script::new(
        r"
        local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
        local promoted = {}

        for _, member in ipairs(due) do
            local sep = string.find(member, ':', 1, true)
            if sep then
                local priority = string.sub(member, 1, sep - 1)
                local job_id = string.sub(member, sep + 1)
                local payload = redis.call('HGET', KEYS[2], job_id)
                if payload then
                    redis.call('XADD', ARGV[3] .. priority, '*', 'job_id', job_id, 'job', payload)
                    promoted[#promoted + 1] = job_id
                end
                redis.call('HDEL', KEYS[2], job_id)
            end
            redis.call('ZREM', KEYS[1], member)
        end

        return promoted
        ",
    )
}

/// Refresh a leader lock only while it is still held by this owner.
///
/// KEYS[1] = lock key, ARGV = owner token, ttl_ms.
/// Returns 1 when refreshed, 0 when the lock was lost.
pub fn refresh_lock_script() -> Script {
    Script::new(
        r"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[2]))
        end
        return 0
        ",
    )
}
